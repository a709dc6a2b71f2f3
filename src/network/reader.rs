//! Reader for the `.oaar` text format.
//!
//! Lines starting with `#` and blank lines are skipped. The layout is
//!
//! ```text
//! name
//! nNodes nOpticalNodes nLinks nOpticalLinks nFlows
//! procDelay queueDelay jitter isOptical      (per node)
//! count link...                              (per node)
//! capacity propDelay bandCost isOptical      (per link)
//! head tail                                  (per link)
//! source destination priority bandwidth delayPrice jitterPrice   (per flow)
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::network::{Flow, Link, Network, Node};

/// Reads and parses an `.oaar` file.
pub fn read_file(path: impl AsRef<Path>) -> Result<Network> {
    let path = path.as_ref();
    let input = fs::read_to_string(path)?;
    let network = parse(&input)?;
    info!(
        "read {} from {}: {} nodes, {} links, {} flows",
        network.name(),
        path.display(),
        network.nodes().len(),
        network.links().len(),
        network.flows().len()
    );
    Ok(network)
}

/// Parses the contents of an `.oaar` file.
pub fn parse(input: &str) -> Result<Network> {
    let mut lines = Lines::new(input);

    let (_, name) = lines.next_line("problem name")?;
    let name = name
        .first()
        .copied()
        .unwrap_or_default()
        .to_string();

    let (line, counts) = lines.next_line("problem dimensions")?;
    let counts: Vec<usize> = parse_fields(line, &counts, 5)?;
    let (n_nodes, n_optical_nodes, n_links, n_optical_links, n_flows) =
        (counts[0], counts[1], counts[2], counts[3], counts[4]);
    debug!(
        "nodes {} ({} optical), links {} ({} optical), flows {}",
        n_nodes, n_optical_nodes, n_links, n_optical_links, n_flows
    );

    let mut nodes = Vec::with_capacity(n_nodes);
    for _ in 0..n_nodes {
        let (line, fields) = lines.next_line("node attributes")?;
        let values: Vec<f64> = parse_fields(line, &fields, 4)?;
        let mut node = Node::new(values[0], values[1], values[2], flag(line, values[3])?);

        let (line, fields) = lines.next_line("node adjacency")?;
        let adjacency: Vec<usize> = parse_fields(line, &fields, 1)?;
        let count = adjacency[0];
        if adjacency.len() != count + 1 {
            return Err(Error::Parse {
                line,
                message: format!(
                    "node declares {} links but lists {}",
                    count,
                    adjacency.len() - 1
                ),
            });
        }
        node.links = adjacency[1..].to_vec();
        nodes.push(node);
    }

    let mut links = Vec::with_capacity(n_links + n_flows);
    for _ in 0..n_links {
        let (line, fields) = lines.next_line("link attributes")?;
        let values: Vec<f64> = parse_fields(line, &fields, 4)?;
        let optical = flag(line, values[3])?;

        let (line, fields) = lines.next_line("link endpoints")?;
        let ends: Vec<usize> = parse_fields(line, &fields, 2)?;
        links.push(Link::new(values[0], values[1], values[2], optical, ends[0], ends[1]));
    }

    let mut flows = Vec::with_capacity(n_flows);
    for _ in 0..n_flows {
        let (line, fields) = lines.next_line("flow")?;
        if fields.len() < 6 {
            return Err(Error::Parse {
                line,
                message: format!("expected 6 fields, found {}", fields.len()),
            });
        }
        let ends: Vec<usize> = parse_fields(line, &fields[..2], 2)?;
        let values: Vec<f64> = parse_fields(line, &fields[2..], 4)?;
        flows.push(Flow {
            source: ends[0],
            destination: ends[1],
            priority: values[0],
            bandwidth: values[1],
            delay_price: values[2],
            jitter_price: values[3],
        });
    }

    let network = Network::new(name, nodes, links, flows)?;
    if network.num_optical_nodes() != n_optical_nodes {
        return Err(Error::InvalidNetwork(format!(
            "header declares {} optical nodes, found {}",
            n_optical_nodes,
            network.num_optical_nodes()
        )));
    }
    if network.num_optical_links() != n_optical_links {
        return Err(Error::InvalidNetwork(format!(
            "header declares {} optical links, found {}",
            n_optical_links,
            network.num_optical_links()
        )));
    }
    Ok(network)
}

struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
    last: usize,
}

impl<'a> Lines<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            inner: input.lines().enumerate(),
            last: 0,
        }
    }

    /// Next significant line as (1-based line number, whitespace separated fields).
    fn next_line(&mut self, what: &str) -> Result<(usize, Vec<&'a str>)> {
        for (index, text) in self.inner.by_ref() {
            self.last = index + 1;
            let text = text.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            return Ok((index + 1, text.split_whitespace().collect()));
        }
        Err(Error::Parse {
            line: self.last + 1,
            message: format!("unexpected end of input, expected {}", what),
        })
    }
}

fn parse_fields<T: FromStr>(line: usize, fields: &[&str], minimum: usize) -> Result<Vec<T>> {
    if fields.len() < minimum {
        return Err(Error::Parse {
            line,
            message: format!("expected {} fields, found {}", minimum, fields.len()),
        });
    }
    fields
        .iter()
        .map(|field| {
            field.parse().map_err(|_| Error::Parse {
                line,
                message: format!("invalid number '{}'", field),
            })
        })
        .collect()
}

fn flag(line: usize, value: f64) -> Result<bool> {
    if value == 0.0 {
        Ok(false)
    } else if value == 1.0 {
        Ok(true)
    } else {
        Err(Error::Parse {
            line,
            message: format!("expected 0 or 1, found {}", value),
        })
    }
}
