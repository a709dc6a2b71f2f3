use crate::network::Network;

/// A decoded position in the original variable layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginalVar {
    /// `x`: the route uses the link
    Link(usize),
    /// `y`: the route selects a wavelength on an optical link
    Wavelength { link: usize, wavelength: usize },
    /// `z`: the route uses the link and the wavelength
    Bridge { link: usize, wavelength: usize },
}

/// Index arithmetic for the variables of a pricing subproblem.
///
/// The `L + 2*O*W` binary variables are ordered as `x[l]` for every link, then `y[o][w]` and
/// `z[o][w]` for every optical link position `o` and wavelength `w`. Optical positions follow
/// link index order. Column incidence vectors use the same layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableLayout {
    num_links: usize,
    wavelengths: usize,
    optical_links: Vec<usize>,
    positions: Vec<Option<usize>>,
}

impl VariableLayout {
    pub fn new(network: &Network, wavelengths: usize) -> Self {
        let mut optical_links = Vec::new();
        let positions = network
            .links()
            .iter()
            .enumerate()
            .map(|(l, link)| {
                link.optical.then(|| {
                    optical_links.push(l);
                    optical_links.len() - 1
                })
            })
            .collect();
        Self {
            num_links: network.links().len(),
            wavelengths,
            optical_links,
            positions,
        }
    }

    /// Total number of variables.
    pub fn len(&self) -> usize {
        self.num_links + 2 * self.optical_links.len() * self.wavelengths
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_links(&self) -> usize {
        self.num_links
    }

    pub fn wavelengths(&self) -> usize {
        self.wavelengths
    }

    /// Optical links in position order.
    pub fn optical_links(&self) -> &[usize] {
        &self.optical_links
    }

    /// Position of an optical link among the optical links.
    pub fn position(&self, link: usize) -> Option<usize> {
        self.positions.get(link).copied().flatten()
    }

    pub fn link(&self, link: usize) -> usize {
        link
    }

    pub fn wavelength(&self, position: usize, wavelength: usize) -> usize {
        self.num_links + position * self.wavelengths + wavelength
    }

    pub fn bridge(&self, position: usize, wavelength: usize) -> usize {
        self.num_links
            + (self.optical_links.len() + position) * self.wavelengths
            + wavelength
    }

    pub fn decode(&self, var: usize) -> Option<OriginalVar> {
        if var < self.num_links {
            return Some(OriginalVar::Link(var));
        }
        let block = self.optical_links.len() * self.wavelengths;
        let offset = var - self.num_links;
        if offset >= 2 * block {
            return None;
        }
        let (inner, bridge) = if offset < block {
            (offset, false)
        } else {
            (offset - block, true)
        };
        let link = self.optical_links[inner / self.wavelengths];
        let wavelength = inner % self.wavelengths;
        Some(if bridge {
            OriginalVar::Bridge { link, wavelength }
        } else {
            OriginalVar::Wavelength { link, wavelength }
        })
    }
}
