//! The analysis session: the explicit context every fitting operation works on.

use tracing::debug;

use crate::data::{Cluster, ClusterDescriptor, ClusterIter, ExperimentalDesign, Spin};
use crate::dispersion::{DispModel, Integration};
use crate::error::{DispError, Result};

/// Owns the experimental design, the spins, the clustering, the model and the
/// Monte Carlo simulation count of one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    pub design: ExperimentalDesign,
    /// Propagator evaluation for the numerical models.
    pub integration: Integration,
    spins: Vec<Spin>,
    clusters: Vec<Cluster>,
    model: Option<DispModel>,
    sim_number: Option<usize>,
}

impl AnalysisSession {
    pub fn new(design: ExperimentalDesign) -> Self {
        Self {
            design,
            integration: Integration::default(),
            spins: Vec::new(),
            clusters: Vec::new(),
            model: None,
            sim_number: None,
        }
    }

    /// Add a spin, returning its index.
    pub fn add_spin(&mut self, mut spin: Spin) -> Result<usize> {
        if self.spins.iter().any(|s| s.id == spin.id) {
            return Err(DispError::InvalidInput(format!(
                "The spin '{}' already exists",
                spin.id
            )));
        }
        spin.model = self.model;
        self.spins.push(spin);
        Ok(self.spins.len() - 1)
    }

    pub fn spins(&self) -> &[Spin] {
        &self.spins
    }

    pub fn spins_mut(&mut self) -> &mut [Spin] {
        &mut self.spins
    }

    pub fn spin(&self, index: usize) -> Result<&Spin> {
        self.spins
            .get(index)
            .ok_or_else(|| DispError::NotFound(format!("No spin at index {}", index)))
    }

    pub fn spin_mut(&mut self, index: usize) -> Result<&mut Spin> {
        self.spins
            .get_mut(index)
            .ok_or_else(|| DispError::NotFound(format!("No spin at index {}", index)))
    }

    pub fn spin_index(&self, id: &str) -> Result<usize> {
        self.spins
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| DispError::NotFound(format!("The spin '{}' does not exist", id)))
    }

    pub fn spin_by_id(&self, id: &str) -> Result<&Spin> {
        let index = self.spin_index(id)?;
        self.spin(index)
    }

    /// Set the dispersion model for every spin.
    pub fn set_model(&mut self, model: DispModel) -> Result<()> {
        for key in self.design.keys() {
            if !model.supports(key.exp_type) {
                return Err(DispError::Configuration(format!(
                    "The {} model cannot be used for {:?} experiments",
                    model, key.exp_type
                )));
            }
        }
        debug!(model = %model, "Setting the dispersion model");
        self.model = Some(model);
        for spin in &mut self.spins {
            spin.model = Some(model);
        }
        Ok(())
    }

    /// The current model, or a configuration error if none has been set.
    pub fn model(&self) -> Result<DispModel> {
        self.model
            .ok_or_else(|| DispError::Configuration("The relaxation dispersion model has not been specified".to_string()))
    }

    /// Place spins into a cluster, removing them from any previous cluster.
    pub fn cluster(&mut self, cluster_id: &str, spin_ids: &[&str]) -> Result<()> {
        for id in spin_ids {
            self.spin_index(id)?;
        }

        for cluster in &mut self.clusters {
            cluster.spin_ids.retain(|s| !spin_ids.contains(&s.as_str()));
        }
        self.clusters.retain(|c| !c.spin_ids.is_empty() || c.id == cluster_id);

        match self.clusters.iter_mut().find(|c| c.id == cluster_id) {
            Some(cluster) => cluster.spin_ids.extend(spin_ids.iter().map(|s| s.to_string())),
            None => self.clusters.push(Cluster {
                id: cluster_id.to_string(),
                spin_ids: spin_ids.iter().map(|s| s.to_string()).collect(),
            }),
        }
        Ok(())
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Loop over the fitting units: the clusters first, then every free spin.
    ///
    /// The R2eff model fits every spin independently, so clustering is ignored.
    /// With `skip_desel`, deselected spins are dropped and empty units skipped.
    pub fn cluster_loop(&self, skip_desel: bool) -> ClusterIter {
        let keep = |index: usize| !skip_desel || self.spins[index].select;
        let mut descriptors = Vec::new();

        let per_spin = self.model == Some(DispModel::R2eff);
        let mut clustered = vec![false; self.spins.len()];

        if !per_spin {
            for cluster in &self.clusters {
                let spin_indices: Vec<usize> = cluster
                    .spin_ids
                    .iter()
                    .filter_map(|id| self.spins.iter().position(|s| &s.id == id))
                    .collect();
                for &i in &spin_indices {
                    clustered[i] = true;
                }
                let spin_indices: Vec<usize> = spin_indices.into_iter().filter(|&i| keep(i)).collect();
                if spin_indices.is_empty() {
                    continue;
                }
                descriptors.push(ClusterDescriptor {
                    id: cluster.id.clone(),
                    spin_ids: spin_indices.iter().map(|&i| self.spins[i].id.clone()).collect(),
                    spin_indices,
                });
            }
        }

        for (i, spin) in self.spins.iter().enumerate() {
            if clustered[i] || !keep(i) {
                continue;
            }
            descriptors.push(ClusterDescriptor {
                id: spin.id.clone(),
                spin_indices: vec![i],
                spin_ids: vec![spin.id.clone()],
            });
        }

        ClusterIter::new(descriptors)
    }

    /// The spins of a fitting unit.
    pub fn cluster_spins(&self, cluster: &ClusterDescriptor) -> Vec<&Spin> {
        cluster
            .spin_indices
            .iter()
            .filter_map(|&i| self.spins.get(i))
            .collect()
    }

    /// Mutable access to the spins of a fitting unit, in cluster order.
    pub fn cluster_spins_mut(&mut self, cluster: &ClusterDescriptor) -> Vec<&mut Spin> {
        let mut slots: Vec<Option<&mut Spin>> = self.spins.iter_mut().map(Some).collect();
        cluster
            .spin_indices
            .iter()
            .filter_map(|&i| slots.get_mut(i).and_then(|s| s.take()))
            .collect()
    }

    /// Fix the number of Monte Carlo simulations for the whole run.
    pub fn set_sim_number(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(DispError::InvalidInput(
                "The number of Monte Carlo simulations must be positive".to_string(),
            ));
        }
        self.sim_number = Some(n);
        for spin in &mut self.spins {
            spin.select_sim = vec![true; n];
        }
        Ok(())
    }

    pub fn sim_number(&self) -> Result<usize> {
        self.sim_number.ok_or_else(|| {
            DispError::Configuration("The number of Monte Carlo simulations has not been set".to_string())
        })
    }
}
