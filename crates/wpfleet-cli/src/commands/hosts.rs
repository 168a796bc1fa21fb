//! `wpfleet hosts`: print the expansion of a range expression.

use anyhow::{Result, bail};
use tabled::Tabled;

use super::Fleet;
use crate::output::{OutputFormat, print_json, print_table};

#[derive(Tabled)]
struct HostRow {
    host: String,
}

pub fn execute(range: &str, fleet: &Fleet) -> Result<bool> {
    let hosts: Vec<String> = fleet.targets(range)?.iter().map(ToString::to_string).collect();
    match fleet.format {
        OutputFormat::Table => print_table(hosts.into_iter().map(|host| HostRow { host }).collect()),
        OutputFormat::Json => print_json(&hosts)?,
        OutputFormat::Prometheus => bail!("prometheus output is only available for `health`"),
    }
    Ok(true)
}
