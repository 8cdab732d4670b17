//! Object and event selection.
//!
//! Reduces a raw [`ParticleCollection`] to the subset needed for fitting,
//! honoring per-category kinematic thresholds and multiplicity cuts, and
//! keeps cut-flow statistics plus index maps back into the original event.

use kf_core::{Error, Particle, ParticleCollection, ParticleType, Result};

/// One multiplicity cut: at least/around `n` objects with attribute >= `value`.
///
/// Tolerance convention: `tolerance >= 0` means the symmetric window
/// `n - tolerance <= count <= n + tolerance`; `tolerance < 0` (the legacy
/// default) means floor-only, i.e. at least `n` with no upper bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cut {
    /// Attribute threshold (e.g. jet pT) an object must pass to count.
    pub value: f64,
    /// Required object count.
    pub n: i32,
    /// Window half-width; negative means floor-only.
    pub tolerance: i32,
}

impl Cut {
    /// Whether `count` satisfies this cut.
    pub fn satisfied_by(&self, count: usize) -> bool {
        let count = count as i32;
        if self.tolerance < 0 {
            count >= self.n
        } else {
            (self.n - self.tolerance..=self.n + self.tolerance).contains(&count)
        }
    }
}

/// Monotone cut-flow counters, reset only by explicit request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionCounters {
    /// Events passing the full selection.
    pub events: u64,
    /// Events passing the jet multiplicity cuts.
    pub jets: u64,
    /// Events passing the electron multiplicity cuts.
    pub electrons: u64,
    /// Events passing the muon multiplicity cuts.
    pub muons: u64,
    /// Events passing the photon multiplicity cuts.
    pub photons: u64,
    /// Events passing the missing-ET cut.
    pub met: u64,
}

impl SelectionCounters {
    fn category_mut(&mut self, ptype: ParticleType) -> &mut u64 {
        match ptype {
            ParticleType::Jet => &mut self.jets,
            ParticleType::Electron => &mut self.electrons,
            ParticleType::Muon => &mut self.muons,
            ParticleType::Photon => &mut self.photons,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CategoryRules {
    cuts: Vec<Cut>,
    /// |eta| < eta_max acceptance; `None` means unbounded.
    eta_max: Option<f64>,
}

impl CategoryRules {
    /// Most permissive pT threshold across the registered cuts.
    ///
    /// Admission uses the minimum cut value; the stricter cuts are
    /// enforced at the multiplicity level, not by excluding objects.
    /// No registered cuts means no pT requirement.
    fn admission_threshold(&self) -> f64 {
        if self.cuts.is_empty() {
            return 0.0;
        }
        self.cuts.iter().map(|c| c.value).fold(f64::INFINITY, f64::min)
    }

    fn admits(&self, particle: &Particle) -> bool {
        if particle.pt < self.admission_threshold() {
            return false;
        }
        match self.eta_max {
            Some(eta_max) => particle.eta.abs() < eta_max,
            None => true,
        }
    }
}

/// The selection stage.
///
/// Configuration (cuts, eta windows, MET cut, max jets) persists across
/// events; per-event outputs (selected particles, index maps) are rebuilt
/// on every [`SelectionTool::select_objects`] call.
#[derive(Debug, Clone, Default)]
pub struct SelectionTool {
    jets: CategoryRules,
    electrons: CategoryRules,
    muons: CategoryRules,
    photons: CategoryRules,
    /// Minimum missing-ET for event selection; `None` means no MET cut.
    met_min: Option<f64>,
    /// Cap on the number of jets handed to the fit; `None` means uncapped.
    max_jets_for_fit: Option<usize>,
    counters: SelectionCounters,
    particles_selected: Option<ParticleCollection>,
    map_jets: Vec<usize>,
    map_electrons: Vec<usize>,
    map_muons: Vec<usize>,
    map_photons: Vec<usize>,
}

impl SelectionTool {
    /// A selection stage with no cuts registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a multiplicity cut for a category.
    ///
    /// Errors on negative `n`, leaving the cut list unmodified. Whether
    /// any objects currently satisfy the cut is evaluated lazily at
    /// selection time, not here.
    pub fn require_count(
        &mut self,
        ptype: ParticleType,
        threshold: f64,
        n: i32,
        tolerance: i32,
    ) -> Result<()> {
        if n < 0 {
            return Err(Error::Validation(format!(
                "require_count: negative object count {n} for {ptype}"
            )));
        }
        self.rules_mut(ptype).cuts.push(Cut { value: threshold, n, tolerance });
        Ok(())
    }

    /// Set the |eta| < `eta_max` acceptance window for a category.
    pub fn set_eta_window(&mut self, ptype: ParticleType, eta_max: f64) {
        self.rules_mut(ptype).eta_max = Some(eta_max);
    }

    /// Require missing-ET >= `met_min` in [`SelectionTool::select_event`].
    pub fn require_met(&mut self, met_min: f64) {
        self.met_min = Some(met_min);
    }

    /// Cap the number of jets handed to the fit.
    ///
    /// When more jets are admitted, the first `n` in original order are
    /// kept and the rest dropped from the back.
    pub fn set_max_jets_for_fit(&mut self, n: usize) {
        self.max_jets_for_fit = Some(n);
    }

    /// Reduce `particles` to the selected subset.
    ///
    /// Admission per category: pT >= the most permissive registered cut
    /// value and |eta| inside the window, original order preserved.
    /// Every registered multiplicity cut is then checked against the
    /// admitted counts; any failure means the event is not selected and
    /// `None` is returned with counters untouched.
    pub fn select_objects(&mut self, particles: &ParticleCollection) -> Option<ParticleCollection> {
        let mut selected = ParticleCollection::new();
        self.reset_maps();

        for ptype in ParticleType::ALL {
            let rules = self.rules(ptype).clone();
            let mut admitted = 0usize;
            for (original_idx, particle) in particles.iter(ptype).enumerate() {
                if !rules.admits(particle) {
                    continue;
                }
                if ptype == ParticleType::Jet {
                    if let Some(max) = self.max_jets_for_fit {
                        if admitted >= max {
                            break;
                        }
                    }
                }
                selected.add(ptype, *particle);
                self.map_mut(ptype).push(original_idx);
                admitted += 1;
            }
        }

        for ptype in ParticleType::ALL {
            let count = selected.count(ptype);
            for cut in &self.rules(ptype).cuts {
                if !cut.satisfied_by(count) {
                    log::debug!(
                        "selection: {ptype} multiplicity cut failed ({count} admitted, \
                         n={} tol={})",
                        cut.n,
                        cut.tolerance
                    );
                    self.reset_maps();
                    self.particles_selected = None;
                    return None;
                }
            }
        }

        self.particles_selected = Some(selected.clone());
        Some(selected)
    }

    /// Full event selection: missing-ET cut plus all multiplicity cuts.
    ///
    /// Returns whether the event passed. Counter accounting is
    /// all-or-nothing: on an overall pass the event counter, each
    /// cut-bearing category counter, and (if configured) the MET counter
    /// are incremented once; any failure increments nothing.
    pub fn select_event(&mut self, particles: &ParticleCollection, met: f64) -> bool {
        if let Some(met_min) = self.met_min {
            if met < met_min {
                log::debug!("selection: MET {met} below cut {met_min}");
                return false;
            }
        }

        if self.select_objects(particles).is_none() {
            return false;
        }

        self.counters.events += 1;
        for ptype in ParticleType::ALL {
            if !self.rules(ptype).cuts.is_empty() {
                *self.counters.category_mut(ptype) += 1;
            }
        }
        if self.met_min.is_some() {
            self.counters.met += 1;
        }
        true
    }

    /// The selected particles of the last successful selection.
    pub fn particles_selected(&self) -> Option<&ParticleCollection> {
        self.particles_selected.as_ref()
    }

    /// Take ownership of the selected particles (single consumer).
    pub fn take_particles_selected(&mut self) -> Option<ParticleCollection> {
        self.particles_selected.take()
    }

    /// Selected-to-original index map for jets.
    pub fn map_jets(&self) -> &[usize] {
        &self.map_jets
    }

    /// Selected-to-original index map for electrons.
    pub fn map_electrons(&self) -> &[usize] {
        &self.map_electrons
    }

    /// Selected-to-original index map for muons.
    pub fn map_muons(&self) -> &[usize] {
        &self.map_muons
    }

    /// Selected-to-original index map for photons.
    pub fn map_photons(&self) -> &[usize] {
        &self.map_photons
    }

    /// Cut-flow counters.
    pub fn counters(&self) -> SelectionCounters {
        self.counters
    }

    /// Clear all index maps. Idempotent.
    pub fn reset_maps(&mut self) {
        self.map_jets.clear();
        self.map_electrons.clear();
        self.map_muons.clear();
        self.map_photons.clear();
    }

    /// Zero all counters. Idempotent.
    pub fn reset_counters(&mut self) {
        self.counters = SelectionCounters::default();
    }

    fn rules(&self, ptype: ParticleType) -> &CategoryRules {
        match ptype {
            ParticleType::Jet => &self.jets,
            ParticleType::Electron => &self.electrons,
            ParticleType::Muon => &self.muons,
            ParticleType::Photon => &self.photons,
        }
    }

    fn rules_mut(&mut self, ptype: ParticleType) -> &mut CategoryRules {
        match ptype {
            ParticleType::Jet => &mut self.jets,
            ParticleType::Electron => &mut self.electrons,
            ParticleType::Muon => &mut self.muons,
            ParticleType::Photon => &mut self.photons,
        }
    }

    fn map_mut(&mut self, ptype: ParticleType) -> &mut Vec<usize> {
        match ptype {
            ParticleType::Jet => &mut self.map_jets,
            ParticleType::Electron => &mut self.map_electrons,
            ParticleType::Muon => &mut self.map_muons,
            ParticleType::Photon => &mut self.map_photons,
        }
    }
}
