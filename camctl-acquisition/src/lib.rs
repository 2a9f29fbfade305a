//! # Configuration d'acquisition et séquencement des images
//!
//! Ce module configure une caméra GigE Vision ou USB3 Vision à travers
//! l'interface `CameraControl` puis livre ses images une à une.
//!
//! ## Caractéristiques principales
//!
//! - Géométrie: binning, format de pixel et région d'intérêt sans dépassement transitoire
//! - Exposition selon la génération de caméra (absolue, héritée ou base × raw)
//! - Déclenchement interne, logiciel ou sur ligne matérielle
//! - Réglage du flux GigE (taille de paquet, délais, file de sortie)
//! - Séquence avec arrêt de la saisie garanti sur chaque chemin de sortie
//! - Exécution sur tâche bloquante tokio et métriques par caméra
//!
//! ## Exemple d'utilisation
//!
//! ```rust
//! use camctl_acquisition::{CameraHandle, PlanConfig, SessionConfig, TriggerPolicy};
//! use camctl_camera::SimulatedCamera;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Ouvrir la caméra et appliquer la configuration de session
//!     let camera = SimulatedCamera::gige("21000001");
//!     let mut handle = CameraHandle::open(camera, SessionConfig::default())?;
//!
//!     // Décrire l'acquisition
//!     let plan = PlanConfig::new()
//!         .nb_frames(5)
//!         .exposure(0.01)
//!         .roi("100,50,640,480".parse()?)
//!         .trigger(TriggerPolicy::Software)
//!         .build()?;
//!
//!     // Acquérir les images
//!     let mut acquisition = handle.acquisition(plan);
//!     while let Some(frame) = acquisition.next_frame() {
//!         let frame = frame?;
//!         println!("Image {}: {}x{}", frame.index(), frame.width(), frame.height());
//!     }
//!     println!("{}", acquisition.report());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exposure;
pub mod frame;
pub mod geometry;
pub mod handle;
pub mod network;
pub mod runner;
pub mod sequencer;
pub mod trigger;

#[cfg(test)]
mod testing;

// Re-exports
pub use camctl_camera;
pub use config::{AcquisitionPlan, AcquisitionSettings, PlanConfig, SessionConfig};
pub use error::{AcquisitionError, ErrorCategory, Result};
pub use exposure::{
    apply_exposure, configure_frame_rate, exposure_range, latency_range, ExposurePolicy,
    ExposureScheme,
};
pub use frame::{Frame, FrameRecord};
pub use geometry::{apply_roi, normalize_geometry, Binning, Roi};
pub use handle::{CameraHandle, PreparedState};
pub use network::{tune_network, NetworkTuning};
pub use runner::{spawn_acquisition, AcquisitionTask};
pub use sequencer::{
    Acquisition, AcquisitionReport, SequencerState, StopToken, TRIGGER_READY_TIMEOUT,
};
pub use trigger::{set_trigger, TriggerActivation, TriggerLine, TriggerPolicy, TriggerState};

/// Version du module
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
