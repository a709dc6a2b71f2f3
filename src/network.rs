//! Topology and demand model.
//!
//! A [`Network`] is loaded once, augmented once with one synthetic fallback link per flow and
//! immutable afterwards. Links are directed head to tail; traversing a link is charged the
//! delay and jitter of its head node plus the link's own propagation and transmission delay.

pub mod layout;
pub mod reader;

use log::debug;

use crate::error::{Error, Result};

pub use layout::{OriginalVar, VariableLayout};

/// Packet size, in bits, used to derive transmission delays of electronic links.
pub const PACKET_BITS: f64 = 1500.0 * 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub proc_delay: f64,
    pub queue_delay: f64,
    pub jitter: f64,
    pub optical: bool,
    /// Indices of the links attached to this node
    pub links: Vec<usize>,
}

impl Node {
    pub fn new(proc_delay: f64, queue_delay: f64, jitter: f64, optical: bool) -> Self {
        Self {
            proc_delay,
            queue_delay,
            jitter,
            optical,
            links: Vec::new(),
        }
    }

    /// Delay charged for leaving this node.
    pub fn delay(&self) -> f64 {
        self.proc_delay + self.queue_delay
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub capacity: f64,
    pub prop_delay: f64,
    /// Zero for optical links, `PACKET_BITS / capacity` otherwise
    pub trans_delay: f64,
    pub band_cost: f64,
    pub optical: bool,
    pub head: usize,
    pub tail: usize,
}

impl Link {
    pub fn new(
        capacity: f64,
        prop_delay: f64,
        band_cost: f64,
        optical: bool,
        head: usize,
        tail: usize,
    ) -> Self {
        let trans_delay = if optical || capacity <= 0.0 {
            0.0
        } else {
            PACKET_BITS / capacity
        };
        Self {
            capacity,
            prop_delay,
            trans_delay,
            band_cost,
            optical,
            head,
            tail,
        }
    }

    pub fn is_electronic(&self) -> bool {
        !self.optical
    }
}

/// A point-to-point bandwidth demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub source: usize,
    pub destination: usize,
    pub priority: f64,
    pub bandwidth: f64,
    pub delay_price: f64,
    pub jitter_price: f64,
}

impl Flow {
    /// Cost this flow pays for traversing `link`, whose head node is `head`.
    pub fn link_cost(&self, head: &Node, link: &Link) -> f64 {
        let delay = head.delay() + link.prop_delay + link.trans_delay;
        self.priority
            * (self.delay_price * delay
                + self.jitter_price * head.jitter
                + self.bandwidth * link.band_cost)
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    nodes: Vec<Node>,
    links: Vec<Link>,
    flows: Vec<Flow>,
    /// Index of the first fallback link once augmented
    fallback_start: Option<usize>,
}

impl Network {
    /// Builds a network and checks that every index it carries is in range.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<Node>,
        links: Vec<Link>,
        flows: Vec<Flow>,
    ) -> Result<Self> {
        let network = Self {
            name: name.into(),
            nodes,
            links,
            flows,
            fallback_start: None,
        };
        network.validate()?;
        Ok(network)
    }

    fn validate(&self) -> Result<()> {
        let n = self.nodes.len();
        if n == 0 {
            return Err(Error::InvalidNetwork("network has no nodes".into()));
        }
        for (v, node) in self.nodes.iter().enumerate() {
            if let Some(&l) = node.links.iter().find(|&&l| l >= self.links.len()) {
                return Err(Error::InvalidNetwork(format!(
                    "node {} refers to unknown link {}",
                    v, l
                )));
            }
        }
        for (l, link) in self.links.iter().enumerate() {
            if link.head >= n || link.tail >= n {
                return Err(Error::InvalidNetwork(format!(
                    "link {} connects unknown nodes {} -> {}",
                    l, link.head, link.tail
                )));
            }
            if link.head == link.tail {
                return Err(Error::InvalidNetwork(format!("link {} is a self-loop", l)));
            }
            if link.is_electronic() && link.capacity <= 0.0 {
                return Err(Error::InvalidNetwork(format!(
                    "electronic link {} has non-positive capacity {}",
                    l, link.capacity
                )));
            }
        }
        for (k, flow) in self.flows.iter().enumerate() {
            if flow.source >= n || flow.destination >= n {
                return Err(Error::InvalidNetwork(format!(
                    "flow {} connects unknown nodes {} -> {}",
                    k, flow.source, flow.destination
                )));
            }
            if flow.source == flow.destination {
                return Err(Error::InvalidNetwork(format!(
                    "flow {} has identical source and destination",
                    k
                )));
            }
            if flow.bandwidth <= 0.0 || flow.priority < 0.0 {
                return Err(Error::InvalidNetwork(format!(
                    "flow {} has bandwidth {} and priority {}",
                    k, flow.bandwidth, flow.priority
                )));
            }
        }
        Ok(())
    }

    /// Appends one electronic fallback link per flow, from its source to its destination, with
    /// capacity equal to its bandwidth.
    ///
    /// Augmentation happens once; a second call fails with [`Error::AlreadyAugmented`] and leaves
    /// the network untouched.
    pub fn augment_with_fallbacks(&mut self, prop_delay: f64, band_cost: f64) -> Result<()> {
        if self.fallback_start.is_some() {
            return Err(Error::AlreadyAugmented);
        }
        let start = self.links.len();
        for flow in &self.flows {
            let index = self.links.len();
            self.links.push(Link::new(
                flow.bandwidth,
                prop_delay,
                band_cost,
                false,
                flow.source,
                flow.destination,
            ));
            self.nodes[flow.source].links.push(index);
            self.nodes[flow.destination].links.push(index);
        }
        self.fallback_start = Some(start);
        debug!(
            "added {} fallback links to network {}",
            self.flows.len(),
            self.name
        );
        Ok(())
    }

    pub fn is_augmented(&self) -> bool {
        self.fallback_start.is_some()
    }

    /// The fallback link of `flow`, once augmented.
    pub fn fallback_link(&self, flow: usize) -> Option<usize> {
        self.fallback_start
            .filter(|_| flow < self.flows.len())
            .map(|start| start + flow)
    }

    pub fn is_fallback(&self, link: usize) -> bool {
        self.fallback_start
            .is_some_and(|start| link >= start && link < self.links.len())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn link(&self, index: usize) -> &Link {
        &self.links[index]
    }

    pub fn flow(&self, index: usize) -> &Flow {
        &self.flows[index]
    }

    #[cfg(test)]
    pub(crate) fn link_mut(&mut self, index: usize) -> &mut Link {
        &mut self.links[index]
    }

    pub fn num_optical_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.optical).count()
    }

    pub fn num_optical_links(&self) -> usize {
        self.links.iter().filter(|l| l.optical).count()
    }

    /// Cost `flow` pays for traversing `link`.
    pub fn link_cost(&self, flow: usize, link: usize) -> f64 {
        let link = &self.links[link];
        self.flows[flow].link_cost(&self.nodes[link.head], link)
    }

    /// Upper bound on the cost of any route of `flow`: a route uses each link at most once.
    pub fn route_cost_bound(&self, flow: usize) -> f64 {
        (0..self.links.len())
            .map(|l| self.link_cost(flow, l).max(0.0))
            .sum()
    }

    /// Total cost of a route given as link indices.
    pub fn path_cost<I>(&self, flow: usize, links: I) -> f64
    where
        I: IntoIterator<Item = usize>,
    {
        links.into_iter().map(|l| self.link_cost(flow, l)).sum()
    }
}
