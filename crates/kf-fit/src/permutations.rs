//! Permutation table: enumeration of object-to-role assignments.
//!
//! One permutation assigns every object of every category to a role slot
//! by reordering the category sequences. The table is the cartesian
//! product of per-category index permutations; physically-invariant
//! permutations can be pruned via [`PermutationTable::remove_invariant`].

use kf_core::{ParticleCollection, ParticleType};

/// One row of the table: an index order per category.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment {
    orders: [Vec<usize>; 4],
}

impl Assignment {
    fn order(&self, ptype: ParticleType) -> &[usize] {
        &self.orders[category_slot(ptype)]
    }
}

fn category_slot(ptype: ParticleType) -> usize {
    match ptype {
        ParticleType::Jet => 0,
        ParticleType::Electron => 1,
        ParticleType::Muon => 2,
        ParticleType::Photon => 3,
    }
}

/// All permutations of `0..n`, in lexicographic order.
fn index_permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    let mut current: Vec<usize> = (0..n).collect();
    let mut used = vec![false; n];
    fn recurse(
        n: usize,
        depth: usize,
        current: &mut Vec<usize>,
        used: &mut Vec<bool>,
        out: &mut Vec<Vec<usize>>,
    ) {
        if depth == n {
            out.push(current[..n].to_vec());
            return;
        }
        for i in 0..n {
            if used[i] {
                continue;
            }
            used[i] = true;
            current[depth] = i;
            recurse(n, depth + 1, current, used, out);
            used[i] = false;
        }
    }
    recurse(n, 0, &mut current, &mut used, &mut out);
    out
}

/// Enumerates valid object-to-role assignments over a particle set.
#[derive(Debug, Clone, Default)]
pub struct PermutationTable {
    particles: Option<ParticleCollection>,
    rows: Vec<Assignment>,
    active: Option<usize>,
    active_view: Option<ParticleCollection>,
}

impl PermutationTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table for a new particle set.
    ///
    /// Produces the cartesian product of per-category permutations; the
    /// active permutation is cleared.
    pub fn rebuild(&mut self, particles: &ParticleCollection) {
        let per_category: Vec<Vec<Vec<usize>>> = ParticleType::ALL
            .iter()
            .map(|&t| index_permutations(particles.count(t)))
            .collect();

        let mut rows = Vec::new();
        for jets in &per_category[0] {
            for electrons in &per_category[1] {
                for muons in &per_category[2] {
                    for photons in &per_category[3] {
                        rows.push(Assignment {
                            orders: [
                                jets.clone(),
                                electrons.clone(),
                                muons.clone(),
                                photons.clone(),
                            ],
                        });
                    }
                }
            }
        }

        self.particles = Some(particles.clone());
        self.rows = rows;
        self.active = None;
        self.active_view = None;
    }

    /// Drop the table contents and the active permutation.
    pub fn reset(&mut self) {
        self.particles = None;
        self.rows.clear();
        self.active = None;
        self.active_view = None;
    }

    /// Number of (remaining) permutations.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Select the active permutation. Returns false when out of range.
    pub fn activate(&mut self, index: usize) -> bool {
        let Some(particles) = &self.particles else {
            return false;
        };
        let Some(row) = self.rows.get(index) else {
            return false;
        };

        let mut view = particles.clone();
        for ptype in ParticleType::ALL {
            view = view.reordered(ptype, row.order(ptype));
        }
        self.active = Some(index);
        self.active_view = Some(view);
        true
    }

    /// Index of the active permutation.
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// Permuted particle view of the active permutation.
    pub fn active_view(&self) -> Option<&ParticleCollection> {
        self.active_view.as_ref()
    }

    /// Remove permutations equivalent under exchange within `positions`
    /// of category `ptype`, keeping the canonical representative whose
    /// assigned original indices are strictly increasing across those
    /// positions. The active permutation is cleared.
    pub fn remove_invariant(&mut self, ptype: ParticleType, positions: &[usize]) {
        if positions.len() < 2 {
            return;
        }
        self.rows.retain(|row| {
            let order = row.order(ptype);
            let assigned: Vec<usize> =
                positions.iter().filter_map(|&p| order.get(p).copied()).collect();
            assigned.windows(2).all(|w| w[0] < w[1])
        });
        self.active = None;
        self.active_view = None;
    }
}
