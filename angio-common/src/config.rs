use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::AngioParams;
use std::path::Path;

// Structured mesh covering the simulation domain
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MeshConfig {
    pub width: f64,
    pub height: f64,
    /// Extent along z. Present only for 3D (box) meshes.
    #[serde(default)]
    pub depth: Option<f64>,
    pub nx: usize,
    pub ny: usize,
    #[serde(default)]
    pub nz: Option<usize>,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub dt: f64,
    pub n_steps: u64,
    #[serde(default = "default_record_interval_steps")]
    pub record_interval_steps: u64,
}

fn default_record_interval_steps() -> u64 {
    1
}

// Number of cooperating ranks and the seed shared by all of them
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParallelConfig {
    #[serde(default = "default_ranks")]
    pub ranks: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_ranks() -> usize {
    1
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig { ranks: default_ranks(), seed: 0 }
    }
}

// Tip cell activation, motion and painting parameters
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TipCellConfig {
    /// T_c: minimum angiogenic factor to activate or keep a tip cell.
    pub af_threshold: f64,
    /// G_m: minimum gradient norm to activate or keep a tip cell.
    pub gradient_min: f64,
    /// G_M: gradient norm above which the velocity is capped.
    pub gradient_max: f64,
    /// R_c: tip cell radius.
    pub cell_radius: f64,
    pub chi: f64,
    pub alpha_p: f64,
    /// T_p: angiogenic factor value at which proliferation saturates.
    pub af_saturation: f64,
    /// phi_th: vessel field threshold.
    pub phi_threshold: f64,
    #[serde(default = "default_phi_min")]
    pub phi_min: f64,
    #[serde(default = "default_phi_max")]
    pub phi_max: f64,
    pub min_tipcell_distance: f64,
}

fn default_phi_min() -> f64 {
    -1.0
}

fn default_phi_max() -> f64 {
    1.0
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLayout {
    /// `count` random mesh vertices with x >= `x_min`.
    Random,
    /// Concentric rings filling a circle of `circle_radius` around `center`.
    Circle,
}

fn default_source_layout() -> SourceLayout {
    SourceLayout::Random
}

// Source cell placement and angiogenic factor expression
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_source_layout")]
    pub layout: SourceLayout,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub x_min: Option<f64>,
    #[serde(default)]
    pub center: Option<Vec<f64>>,
    #[serde(default)]
    pub circle_radius: Option<f64>,
    /// Radius of a source cell, used for painting.
    pub cell_radius: f64,
    /// T_s: angiogenic factor value inside a source cell.
    pub af_source_value: f64,
    /// T_min: value painted outside every source cell.
    #[serde(default)]
    pub af_background: f64,
    /// d: distance at which a vessel consumes a source. Deliberately has no default.
    #[serde(default)]
    pub interaction_radius: Option<f64>,
}

// Initial continuum fields. The PDE solve is external, so the driver only
// needs a vessel seed and a background angiogenic factor profile.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FieldsConfig {
    /// Vessel field is phi_max for x < vessel_x and phi_min elsewhere.
    #[serde(default)]
    pub vessel_x: f64,
    /// Slope of the linear background angiogenic factor along x.
    #[serde(default)]
    pub af_slope: f64,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        FieldsConfig { vessel_x: 0.0, af_slope: 0.0 }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_stats: bool,
    pub save_positions: bool,
    #[serde(default)]
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default)]
    pub save_incremental_tip_cells: bool,
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub mesh: MeshConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    pub tip_cells: TipCellConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mesh.width <= 0.0 || self.mesh.height <= 0.0 {
            anyhow::bail!("mesh width and height must be positive.");
        }
        if self.mesh.nx == 0 || self.mesh.ny == 0 {
            anyhow::bail!("mesh nx and ny must be greater than 0.");
        }
        match (self.mesh.depth, self.mesh.nz) {
            (None, None) => {}
            (Some(depth), Some(nz)) if depth > 0.0 && nz > 0 => {}
            _ => anyhow::bail!("3D meshes need both a positive depth and nz > 0."),
        }
        if self.timing.dt <= 0.0 {
            anyhow::bail!("dt must be positive.");
        }
        if self.parallel.ranks == 0 {
            anyhow::bail!("parallel.ranks must be at least 1.");
        }
        if self.tip_cells.cell_radius <= 0.0 {
            anyhow::bail!("tip_cells.cell_radius must be positive.");
        }
        if self.tip_cells.min_tipcell_distance < 0.0 {
            anyhow::bail!("tip_cells.min_tipcell_distance must not be negative.");
        }
        match self.sources.layout {
            SourceLayout::Random => {
                if self.sources.count.is_none() {
                    anyhow::bail!("random source layout requires sources.count.");
                }
            }
            SourceLayout::Circle => {
                let dim = self.dim();
                match (&self.sources.center, self.sources.circle_radius) {
                    (Some(center), Some(radius)) if center.len() == dim && radius > 0.0 => {}
                    _ => anyhow::bail!(
                        "circle source layout requires a {}D sources.center \
                         and a positive circle_radius.",
                        dim
                    ),
                }
            }
        }
        Ok(())
    }

    /// Spatial dimension implied by the mesh section.
    pub fn dim(&self) -> usize {
        if self.mesh.depth.is_some() { 3 } else { 2 }
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> AngioParams {
        let tc = &self.tip_cells;
        let src = &self.sources;
        AngioParams {
            dim: self.dim(),
            dt: self.timing.dt,
            n_steps: self.timing.n_steps,
            seed: self.parallel.seed,
            // Tip cells
            t_c: tc.af_threshold,
            g_m: tc.gradient_min,
            g_max: tc.gradient_max,
            r_c: tc.cell_radius,
            chi: tc.chi,
            alpha_p: tc.alpha_p,
            t_p: tc.af_saturation,
            phi_th: tc.phi_threshold,
            phi_min: tc.phi_min,
            phi_max: tc.phi_max,
            min_tipcell_distance: tc.min_tipcell_distance,
            // Sources
            source_r_c: src.cell_radius,
            t_s: src.af_source_value,
            t_min: src.af_background,
            d: src.interaction_radius,
        }
    }
}
