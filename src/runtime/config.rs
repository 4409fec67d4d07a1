use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;

use crate::model::table::{Metric, RouterId, MAX_ROUTER_ID};

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 64_000;
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(30);

/// One neighbor declared by the `outputs` directive: the port it listens on,
/// the cost of the direct link, and its router id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborConfig {
    pub router_id: RouterId,
    pub link_metric: Metric,
    pub input_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterConfig {
    pub router_id: RouterId,
    pub input_ports: Vec<u16>,
    pub output_port: u16,
    pub neighbors: Vec<NeighborConfig>,
    pub update_period: Duration,
}

pub fn load_config(path: &Path) -> Result<RouterConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parses the line-oriented router configuration. Blank lines and lines
/// starting with `//` are ignored; every directive may appear at most once.
pub fn parse_config(text: &str) -> Result<RouterConfig> {
    let mut router_id: Option<RouterId> = None;
    let mut input_ports: Option<Vec<u16>> = None;
    let mut output_port: Option<u16> = None;
    let mut neighbors: Option<Vec<NeighborConfig>> = None;
    let mut update_period: Option<Duration> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let line_no = index + 1;
        let mut tokens = line.split_whitespace();
        let Some(directive) = tokens.next() else {
            continue;
        };
        let values: Vec<&str> = tokens.collect();

        match directive {
            "router-id" => {
                ensure!(router_id.is_none(), "line {line_no}: repeated router-id");
                ensure!(
                    values.len() == 1,
                    "line {line_no}: router-id expects exactly one value"
                );
                let id = parse_router_id(values[0])
                    .with_context(|| format!("line {line_no}: bad router-id"))?;
                router_id = Some(id);
            }
            "input-ports" => {
                ensure!(input_ports.is_none(), "line {line_no}: repeated input-ports");
                ensure!(
                    !values.is_empty(),
                    "line {line_no}: input-ports expects at least one port"
                );
                let ports = values
                    .iter()
                    .map(|token| parse_port(token))
                    .collect::<Result<Vec<u16>>>()
                    .with_context(|| format!("line {line_no}: bad input port"))?;
                input_ports = Some(ports);
            }
            "output-port" => {
                ensure!(output_port.is_none(), "line {line_no}: repeated output-port");
                ensure!(
                    values.len() == 1,
                    "line {line_no}: output-port expects exactly one value"
                );
                let port = parse_port(values[0])
                    .with_context(|| format!("line {line_no}: bad output port"))?;
                output_port = Some(port);
            }
            "outputs" => {
                ensure!(neighbors.is_none(), "line {line_no}: repeated outputs");
                ensure!(
                    !values.is_empty(),
                    "line {line_no}: outputs expects at least one port-metric-id token"
                );
                let parsed = values
                    .iter()
                    .map(|token| parse_output(token))
                    .collect::<Result<Vec<NeighborConfig>>>()
                    .with_context(|| format!("line {line_no}: bad output"))?;
                neighbors = Some(parsed);
            }
            "update-period" => {
                ensure!(
                    update_period.is_none(),
                    "line {line_no}: repeated update-period"
                );
                ensure!(
                    values.len() == 1,
                    "line {line_no}: update-period expects exactly one value"
                );
                let seconds: u64 = values[0].parse().with_context(|| {
                    format!("line {line_no}: '{}' is not a valid period", values[0])
                })?;
                ensure!(
                    seconds >= 1,
                    "line {line_no}: update-period must be at least one second"
                );
                update_period = Some(Duration::from_secs(seconds));
            }
            _ => bail!("line {line_no}: unknown directive '{directive}'"),
        }
    }

    let router_id = router_id.context("missing router-id directive")?;
    let input_ports = input_ports.context("missing input-ports directive")?;
    let output_port = output_port.context("missing output-port directive")?;
    let neighbors = neighbors.context("missing outputs directive")?;
    let update_period = update_period.unwrap_or(DEFAULT_UPDATE_PERIOD);

    let mut seen_ports = HashSet::new();
    let all_ports = input_ports
        .iter()
        .chain(std::iter::once(&output_port))
        .chain(neighbors.iter().map(|neighbor| &neighbor.input_port));
    for &port in all_ports {
        ensure!(seen_ports.insert(port), "port {port} is used more than once");
    }

    let mut seen_ids = HashSet::new();
    for neighbor in &neighbors {
        ensure!(
            neighbor.router_id != router_id,
            "neighbor {} shares this router's id",
            neighbor.router_id
        );
        ensure!(
            seen_ids.insert(neighbor.router_id),
            "neighbor {} is declared more than once",
            neighbor.router_id
        );
    }

    Ok(RouterConfig {
        router_id,
        input_ports,
        output_port,
        neighbors,
        update_period,
    })
}

fn parse_router_id(token: &str) -> Result<RouterId> {
    let id: u32 = token
        .parse()
        .with_context(|| format!("'{token}' is not a valid router id"))?;
    ensure!(
        (1..=u32::from(MAX_ROUTER_ID)).contains(&id),
        "router id {id} is outside [1, {MAX_ROUTER_ID}]"
    );
    Ok(id as RouterId)
}

fn parse_port(token: &str) -> Result<u16> {
    let port: u32 = token
        .parse()
        .with_context(|| format!("'{token}' is not a valid port"))?;
    ensure!(
        (u32::from(MIN_PORT)..=u32::from(MAX_PORT)).contains(&port),
        "port {port} is outside [{MIN_PORT}, {MAX_PORT}]"
    );
    Ok(port as u16)
}

fn parse_output(token: &str) -> Result<NeighborConfig> {
    let fields: Vec<&str> = token.split('-').collect();
    ensure!(
        fields.len() == 3,
        "output '{token}' is not of the form port-metric-id"
    );
    let input_port = parse_port(fields[0])?;
    let link_metric: Metric = fields[1]
        .parse()
        .with_context(|| format!("'{}' is not a valid link metric", fields[1]))?;
    ensure!(link_metric >= 1, "link metric must be at least 1");
    let router_id = parse_router_id(fields[2])?;
    Ok(NeighborConfig {
        router_id,
        link_metric,
        input_port,
    })
}
