//! Binned PID efficiency maps in (pt, eta).

use serde::{Deserialize, Serialize};

use rx_core::{Error, Hadron, Result};

/// Efficiency of one species to pass the lepton PID requirement, for a set of blocks.
///
/// `efficiency[i][j]` covers `pt_edges[i]..pt_edges[i+1]` and `eta_edges[j]..eta_edges[j+1]`.
/// Bins are half-open except the last one in each axis, which includes its upper edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyMap {
    /// Species the map applies to.
    pub hadron: Hadron,
    /// Data-taking blocks covered by the map.
    pub blocks: Vec<u32>,
    /// Ascending pt bin edges.
    pub pt_edges: Vec<f64>,
    /// Ascending eta bin edges.
    pub eta_edges: Vec<f64>,
    /// pt-major efficiency grid.
    pub efficiency: Vec<Vec<f64>>,
}

impl EfficiencyMap {
    /// Check shape, ordering and value range.
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(Error::Validation("efficiency map covers no blocks".into()));
        }
        check_edges("pt_edges", &self.pt_edges)?;
        check_edges("eta_edges", &self.eta_edges)?;

        let (npt, neta) = (self.pt_edges.len() - 1, self.eta_edges.len() - 1);
        if self.efficiency.len() != npt {
            return Err(Error::Validation(format!(
                "efficiency has {} pt rows, expected {npt}",
                self.efficiency.len()
            )));
        }
        for (i, row) in self.efficiency.iter().enumerate() {
            if row.len() != neta {
                return Err(Error::Validation(format!(
                    "efficiency row {i} has {} eta bins, expected {neta}",
                    row.len()
                )));
            }
            if let Some(v) = row.iter().find(|v| !(0.0..=1.0).contains(*v)) {
                return Err(Error::Validation(format!(
                    "efficiency row {i} has value {v} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// `true` if the map applies to `hadron` in `block`.
    pub fn covers(&self, hadron: Hadron, block: u32) -> bool {
        self.hadron == hadron && self.blocks.contains(&block)
    }

    /// Efficiency at `(pt, eta)`, `None` outside the binned range.
    pub fn lookup(&self, pt: f64, eta: f64) -> Option<f64> {
        let i = find_bin(&self.pt_edges, pt)?;
        let j = find_bin(&self.eta_edges, eta)?;
        self.efficiency.get(i).and_then(|row| row.get(j)).copied()
    }
}

/// Collection of maps searched by `(hadron, block)`.
#[derive(Debug, Clone, Default)]
pub struct EfficiencyMaps {
    maps: Vec<EfficiencyMap>,
}

impl EfficiencyMaps {
    /// Validate and wrap.
    pub fn new(maps: Vec<EfficiencyMap>) -> Result<Self> {
        for map in &maps {
            map.validate()?;
        }
        Ok(Self { maps })
    }

    /// Number of maps.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// `true` if there are no maps.
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Efficiency for one track. `None` when no map covers the track or it is out of range.
    ///
    /// `block` comes from a numeric column; non-integral or negative values match nothing.
    pub fn lookup(&self, hadron: Hadron, block: f64, pt: f64, eta: f64) -> Option<f64> {
        if !(block >= 0.0 && block.fract() == 0.0 && block <= u32::MAX as f64) {
            return None;
        }
        let block = block as u32;
        self.maps.iter().find(|m| m.covers(hadron, block))?.lookup(pt, eta)
    }
}

fn check_edges(name: &str, edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::Validation(format!("{name} needs at least two edges")));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err(Error::Validation(format!("{name} must be finite")));
    }
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Validation(format!("{name} must be strictly increasing")));
    }
    Ok(())
}

fn find_bin(edges: &[f64], x: f64) -> Option<usize> {
    let (&first, &last) = (edges.first()?, edges.last()?);
    if !(x >= first && x <= last) {
        return None;
    }
    if x == last {
        return Some(edges.len() - 2);
    }
    // Index of the first edge strictly greater than x, minus one.
    Some(edges.partition_point(|&e| e <= x) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kaon_map() -> EfficiencyMap {
        EfficiencyMap {
            hadron: Hadron::Kaon,
            blocks: vec![1, 2],
            pt_edges: vec![0.0, 10.0, 20.0],
            eta_edges: vec![2.0, 3.0, 4.0, 5.0],
            efficiency: vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]],
        }
    }

    #[test]
    fn test_lookup_bins() {
        let m = kaon_map();
        assert_eq!(m.lookup(0.0, 2.0), Some(0.1));
        assert_eq!(m.lookup(9.99, 3.5), Some(0.2));
        assert_eq!(m.lookup(10.0, 3.0), Some(0.5));
        assert_eq!(m.lookup(20.0, 5.0), Some(0.6));
    }

    #[test]
    fn test_lookup_out_of_range() {
        let m = kaon_map();
        assert_eq!(m.lookup(-1.0, 3.0), None);
        assert_eq!(m.lookup(5.0, 5.01), None);
        assert_eq!(m.lookup(f64::NAN, 3.0), None);
    }

    #[test]
    fn test_collection_selects_by_hadron_and_block() {
        let mut pion = kaon_map();
        pion.hadron = Hadron::Pion;
        pion.efficiency = vec![vec![0.9; 3], vec![0.9; 3]];
        let maps = EfficiencyMaps::new(vec![kaon_map(), pion]).unwrap();

        assert_eq!(maps.lookup(Hadron::Kaon, 1.0, 5.0, 2.5), Some(0.1));
        assert_eq!(maps.lookup(Hadron::Pion, 2.0, 5.0, 2.5), Some(0.9));
        assert_eq!(maps.lookup(Hadron::Kaon, 3.0, 5.0, 2.5), None);
        assert_eq!(maps.lookup(Hadron::Electron, 1.0, 5.0, 2.5), None);
        assert_eq!(maps.lookup(Hadron::Kaon, 1.5, 5.0, 2.5), None);
    }

    #[test]
    fn test_validation() {
        assert!(kaon_map().validate().is_ok());

        let mut m = kaon_map();
        m.pt_edges = vec![0.0, 20.0, 10.0];
        assert!(m.validate().is_err());

        let mut m = kaon_map();
        m.efficiency.pop();
        assert!(m.validate().is_err());

        let mut m = kaon_map();
        m.efficiency[1][2] = -0.1;
        assert!(m.validate().is_err());
    }
}
