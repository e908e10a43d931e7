pub mod config;
pub mod links;
pub mod redirects;
pub mod registry;
pub mod sitemap;
pub mod wiki;
