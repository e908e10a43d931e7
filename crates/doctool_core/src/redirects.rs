use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::registry::{AlgorithmRegistry, RegistryError};

/// Extra column for the leading slash of each old path.
const SLASH_WIDTH: usize = 1;
const COLUMN_GAP: usize = 5;

pub const REDIRECT_MAP_HEADER: &str = "#
# THIS FILE WAS AUTO-GENERATED BY: doctool redirects
#
# Apache RewriteMap (txt) mapping old algorithm pages to their current location.
# See http://httpd.apache.org/docs/current/rewrite/rewritemap.html
#";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub name: String,
    pub highest_version: u32,
    pub old_path: String,
    pub new_url: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RedirectMap {
    pub redirects: Vec<Redirect>,
    pub column_width: usize,
}

impl RedirectMap {
    pub fn lines(&self) -> Vec<String> {
        self.redirects
            .iter()
            .map(|redirect| {
                format!(
                    "{:<width$}{}",
                    redirect.old_path,
                    redirect.new_url,
                    width = self.column_width
                )
            })
            .collect()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "{REDIRECT_MAP_HEADER}").context("failed to write redirect header")?;
        writeln!(writer).context("failed to write redirect header")?;
        for line in self.lines() {
            writeln!(writer, "{line}").context("failed to write redirect row")?;
        }
        writer.flush().context("failed to flush redirect map")?;
        Ok(())
    }
}

/// Build the redirect rows for every registered algorithm, sorted by name, each
/// pointing at the page for its highest version.
pub fn build_redirect_map<R: AlgorithmRegistry + ?Sized>(
    registry: &R,
    base_url: &str,
) -> Result<RedirectMap, RegistryError> {
    let algorithms = registry.registered_algorithms()?;

    let mut redirects = Vec::with_capacity(algorithms.len());
    let mut longest_name = 0usize;
    for (name, versions) in &algorithms {
        let highest_version = versions
            .iter()
            .max()
            .copied()
            .ok_or_else(|| RegistryError::EmptyVersions { name: name.clone() })?;
        longest_name = longest_name.max(name.chars().count());
        redirects.push(Redirect {
            name: name.clone(),
            highest_version,
            old_path: format!("/{name}"),
            new_url: format!("{base_url}{name}-v{highest_version}.html"),
        });
    }
    redirects.sort_by(|left, right| left.name.cmp(&right.name));

    Ok(RedirectMap {
        redirects,
        column_width: longest_name + SLASH_WIDTH + COLUMN_GAP,
    })
}
