use serde::{Deserialize, Serialize};

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngioParams {
    // Domain & time
    pub dim: usize,
    pub dt: f64,
    pub n_steps: u64,
    pub seed: u64,

    // Tip cells
    pub t_c: f64,     // Activation/deactivation angiogenic factor threshold
    pub g_m: f64,     // Activation/deactivation gradient threshold
    pub g_max: f64,   // Gradient norm where velocity saturates (G_M)
    pub r_c: f64,     // Tip cell radius
    pub chi: f64,     // Chemotactic coefficient
    pub alpha_p: f64, // Proliferation rate constant
    pub t_p: f64,     // Angiogenic factor saturation for proliferation
    pub phi_th: f64,  // Vessel field threshold
    pub phi_min: f64,
    pub phi_max: f64,
    pub min_tipcell_distance: f64,

    // Sources
    pub source_r_c: f64,
    pub t_s: f64,   // Painted value inside a source
    pub t_min: f64, // Painted value outside every source
    pub d: Option<f64>, // Source consumption distance (no default)
}
