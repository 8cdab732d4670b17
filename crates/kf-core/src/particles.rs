//! Particle data model: categorized final-state objects of one event.

use serde::{Deserialize, Serialize};

/// Object categories with a stable enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleType {
    /// Hadronic jet.
    Jet,
    /// Electron.
    Electron,
    /// Muon.
    Muon,
    /// Photon.
    Photon,
}

impl ParticleType {
    /// All categories, in stable order.
    pub const ALL: [ParticleType; 4] =
        [ParticleType::Jet, ParticleType::Electron, ParticleType::Muon, ParticleType::Photon];
}

impl std::fmt::Display for ParticleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParticleType::Jet => "jet",
            ParticleType::Electron => "electron",
            ParticleType::Muon => "muon",
            ParticleType::Photon => "photon",
        };
        f.write_str(name)
    }
}

/// One reconstructed object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Transverse momentum.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle.
    pub phi: f64,
    /// Energy.
    pub e: f64,
    /// Flavor-tag discriminant (meaningful for jets only).
    pub btag_weight: f64,
}

impl Particle {
    /// A particle with the given kinematics and no tag information.
    pub fn new(pt: f64, eta: f64, phi: f64, e: f64) -> Self {
        Self { pt, eta, phi, e, btag_weight: 0.0 }
    }

    /// Attach a flavor-tag discriminant.
    pub fn with_btag(mut self, weight: f64) -> Self {
        self.btag_weight = weight;
        self
    }
}

/// Categorized, ordered collections of objects for one event.
///
/// Insertion order is preserved per category; selection and permutation
/// both rely on that ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleCollection {
    jets: Vec<Particle>,
    electrons: Vec<Particle>,
    muons: Vec<Particle>,
    photons: Vec<Particle>,
}

impl ParticleCollection {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an object to its category.
    pub fn add(&mut self, ptype: ParticleType, particle: Particle) {
        self.slot_mut(ptype).push(particle);
    }

    /// Number of objects in a category.
    pub fn count(&self, ptype: ParticleType) -> usize {
        self.slot(ptype).len()
    }

    /// Total number of objects across all categories.
    pub fn total(&self) -> usize {
        ParticleType::ALL.iter().map(|&t| self.count(t)).sum()
    }

    /// Object `index` of a category, if present.
    pub fn get(&self, ptype: ParticleType, index: usize) -> Option<&Particle> {
        self.slot(ptype).get(index)
    }

    /// Ordered slice of a category.
    pub fn of_type(&self, ptype: ParticleType) -> &[Particle] {
        self.slot(ptype)
    }

    /// Iterate a category in insertion order.
    pub fn iter(&self, ptype: ParticleType) -> impl Iterator<Item = &Particle> {
        self.slot(ptype).iter()
    }

    fn slot(&self, ptype: ParticleType) -> &Vec<Particle> {
        match ptype {
            ParticleType::Jet => &self.jets,
            ParticleType::Electron => &self.electrons,
            ParticleType::Muon => &self.muons,
            ParticleType::Photon => &self.photons,
        }
    }

    fn slot_mut(&mut self, ptype: ParticleType) -> &mut Vec<Particle> {
        match ptype {
            ParticleType::Jet => &mut self.jets,
            ParticleType::Electron => &mut self.electrons,
            ParticleType::Muon => &mut self.muons,
            ParticleType::Photon => &mut self.photons,
        }
    }

    /// Build a reordered collection: category `ptype` rearranged according
    /// to `order` (indices into the current sequence), other categories
    /// copied as-is. Indices outside range are skipped.
    pub fn reordered(&self, ptype: ParticleType, order: &[usize]) -> ParticleCollection {
        let mut out = self.clone();
        let src = self.slot(ptype);
        let reordered: Vec<Particle> =
            order.iter().filter_map(|&i| src.get(i).copied()).collect();
        *out.slot_mut(ptype) = reordered;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jet(pt: f64) -> Particle {
        Particle::new(pt, 0.5, 0.0, pt * 1.2)
    }

    #[test]
    fn test_add_and_count() {
        let mut particles = ParticleCollection::new();
        particles.add(ParticleType::Jet, jet(40.0));
        particles.add(ParticleType::Jet, jet(30.0));
        particles.add(ParticleType::Electron, Particle::new(25.0, -1.0, 1.5, 26.0));

        assert_eq!(particles.count(ParticleType::Jet), 2);
        assert_eq!(particles.count(ParticleType::Electron), 1);
        assert_eq!(particles.count(ParticleType::Muon), 0);
        assert_eq!(particles.total(), 3);
        assert_eq!(particles.get(ParticleType::Jet, 1).unwrap().pt, 30.0);
        assert!(particles.get(ParticleType::Muon, 0).is_none());
    }

    #[test]
    fn test_order_preserved() {
        let mut particles = ParticleCollection::new();
        for pt in [50.0, 40.0, 30.0] {
            particles.add(ParticleType::Jet, jet(pt));
        }
        let pts: Vec<f64> = particles.iter(ParticleType::Jet).map(|p| p.pt).collect();
        assert_eq!(pts, vec![50.0, 40.0, 30.0]);
    }

    #[test]
    fn test_reordered() {
        let mut particles = ParticleCollection::new();
        for pt in [50.0, 40.0, 30.0] {
            particles.add(ParticleType::Jet, jet(pt));
        }
        let permuted = particles.reordered(ParticleType::Jet, &[2, 0, 1]);
        let pts: Vec<f64> = permuted.iter(ParticleType::Jet).map(|p| p.pt).collect();
        assert_eq!(pts, vec![30.0, 50.0, 40.0]);
        // Other categories untouched.
        assert_eq!(permuted.count(ParticleType::Electron), 0);
    }
}
