//! Configuration de session et plans d'acquisition
//!
//! Ce module définit les paramètres appliqués une fois par session (flux
//! réseau, déclenchement initial) et le plan d'acquisition immuable utilisé
//! par le séquenceur.

use std::path::Path;
use std::time::Duration;

use camctl_camera::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, Result};
use crate::exposure::ExposurePolicy;
use crate::geometry::{Binning, Roi};
use crate::trigger::TriggerPolicy;

/// Configuration appliquée à l'ouverture d'une session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Taille des paquets réseau (en octets)
    pub packet_size: u32,

    /// Délai entre les paquets (en ticks)
    pub inter_packet_delay: u32,

    /// Délai de transmission des images (en ticks)
    pub frame_transmission_delay: u32,

    /// Profondeur de la file de sortie
    pub output_queue_size: u32,

    /// Déclenchement appliqué à l'ouverture
    pub trigger: TriggerPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_size: 1500,
            inter_packet_delay: 0,
            frame_transmission_delay: 0,
            output_queue_size: 5,
            trigger: TriggerPolicy::Internal,
        }
    }
}

/// Paramètres d'un plan d'acquisition, avant validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Nombre d'images (0 = illimité)
    pub nb_frames: u64,

    /// Temps d'exposition (en secondes)
    pub exposure: f64,

    /// Latence entre deux images (en secondes)
    pub latency: f64,

    /// Région d'intérêt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,

    /// Binning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binning: Option<Binning>,

    /// Format de pixel
    pub pixel_format: PixelFormat,

    /// Politique de déclenchement
    pub trigger: TriggerPolicy,

    /// Mode d'exposition
    pub exposure_policy: ExposurePolicy,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            nb_frames: 10,
            exposure: 0.1,
            latency: 0.0,
            roi: None,
            binning: None,
            pixel_format: PixelFormat::Mono8,
            trigger: TriggerPolicy::Internal,
            exposure_policy: ExposurePolicy::Timed,
        }
    }
}

impl PlanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nb_frames(mut self, nb_frames: u64) -> Self {
        self.nb_frames = nb_frames;
        self
    }

    pub fn exposure(mut self, exposure: f64) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn latency(mut self, latency: f64) -> Self {
        self.latency = latency;
        self
    }

    pub fn roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn binning(mut self, binning: Binning) -> Self {
        self.binning = Some(binning);
        self
    }

    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn exposure_policy(mut self, exposure_policy: ExposurePolicy) -> Self {
        self.exposure_policy = exposure_policy;
        self
    }

    /// Valide les paramètres et construit le plan
    pub fn build(&self) -> Result<AcquisitionPlan> {
        check_duration("exposition", self.exposure)?;
        check_duration("latence", self.latency)?;

        if let Some(roi) = &self.roi {
            if roi.width == 0 || roi.height == 0 {
                return Err(AcquisitionError::InvalidPlan(format!(
                    "ROI de dimension nulle: {}",
                    roi
                )));
            }
        }

        if let Some(binning) = &self.binning {
            if binning.horizontal < 1 || binning.vertical < 1 {
                return Err(AcquisitionError::InvalidPlan(format!(
                    "facteur de binning nul: {}",
                    binning
                )));
            }
        }

        Ok(AcquisitionPlan {
            nb_frames: self.nb_frames,
            exposure: self.exposure,
            latency: self.latency,
            roi: self.roi,
            binning: self.binning,
            pixel_format: self.pixel_format,
            trigger: self.trigger,
            exposure_policy: self.exposure_policy,
        })
    }
}

fn check_duration(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(AcquisitionError::InvalidPlan(format!(
            "{} invalide: {} s",
            name, value
        )));
    }
    Ok(())
}

/// Plan d'acquisition validé et immuable
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    nb_frames: u64,
    exposure: f64,
    latency: f64,
    roi: Option<Roi>,
    binning: Option<Binning>,
    pixel_format: PixelFormat,
    trigger: TriggerPolicy,
    exposure_policy: ExposurePolicy,
}

impl AcquisitionPlan {
    /// Nombre d'images demandé (0 = illimité)
    pub fn nb_frames(&self) -> u64 {
        self.nb_frames
    }

    /// Limite passée au démarrage de la saisie
    pub fn max_frames(&self) -> Option<u64> {
        (self.nb_frames > 0).then_some(self.nb_frames)
    }

    pub fn exposure(&self) -> f64 {
        self.exposure
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    pub fn roi(&self) -> Option<&Roi> {
        self.roi.as_ref()
    }

    pub fn binning(&self) -> Option<&Binning> {
        self.binning.as_ref()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn trigger(&self) -> &TriggerPolicy {
        &self.trigger
    }

    pub fn exposure_policy(&self) -> ExposurePolicy {
        self.exposure_policy
    }

    /// Période d'une image (exposition + latence, en secondes)
    pub fn period(&self) -> f64 {
        self.exposure + self.latency
    }

    /// Délai de récupération d'une image: `ceil((période + 1 s) × 1000)` ms
    pub fn frame_timeout(&self) -> Duration {
        // Arrondi à la microseconde pour absorber le bruit des flottants
        let micros = ((self.period() + 1.0) * 1e6).round();
        Duration::from_millis((micros / 1000.0).ceil() as u64)
    }

    /// Paramètres d'origine du plan
    pub fn to_config(&self) -> PlanConfig {
        PlanConfig {
            nb_frames: self.nb_frames,
            exposure: self.exposure,
            latency: self.latency,
            roi: self.roi,
            binning: self.binning,
            pixel_format: self.pixel_format,
            trigger: self.trigger,
            exposure_policy: self.exposure_policy,
        }
    }
}

impl Default for AcquisitionPlan {
    fn default() -> Self {
        Self {
            nb_frames: 10,
            exposure: 0.1,
            latency: 0.0,
            roi: None,
            binning: None,
            pixel_format: PixelFormat::Mono8,
            trigger: TriggerPolicy::Internal,
            exposure_policy: ExposurePolicy::Timed,
        }
    }
}

/// Fichier de configuration complet: `[session]` et `[plan]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub session: SessionConfig,
    pub plan: PlanConfig,
}

impl AcquisitionSettings {
    /// Charge la configuration à partir d'un fichier (format déduit de l'extension)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Enregistre la configuration dans un fichier JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Plan validé
    pub fn plan(&self) -> Result<AcquisitionPlan> {
        self.plan.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerLine;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.packet_size, 1500);
        assert_eq!(session.output_queue_size, 5);
        assert_eq!(session.trigger, TriggerPolicy::Internal);

        let plan = PlanConfig::default().build().unwrap();
        assert_eq!(plan, AcquisitionPlan::default());
        assert_eq!(plan.max_frames(), Some(10));
        assert_eq!(plan.pixel_format(), PixelFormat::Mono8);
    }

    #[test_case(0.1, 0.05, 1150 ; "exposition et latence")]
    #[test_case(0.1, 0.0, 1100 ; "sans latence")]
    #[test_case(1.0, 0.5, 2500 ; "période longue")]
    #[test_case(0.0123, 0.0, 1013 ; "arrondi supérieur")]
    #[test_case(0.0, 0.0, 1000 ; "période nulle")]
    fn test_frame_timeout(exposure: f64, latency: f64, expected_ms: u64) {
        let plan = PlanConfig::new()
            .exposure(exposure)
            .latency(latency)
            .build()
            .unwrap();
        assert_eq!(plan.frame_timeout(), Duration::from_millis(expected_ms));
    }

    #[test_case(PlanConfig::new().exposure(-0.1) ; "exposition négative")]
    #[test_case(PlanConfig::new().exposure(f64::NAN) ; "exposition non finie")]
    #[test_case(PlanConfig::new().latency(f64::INFINITY) ; "latence infinie")]
    #[test_case(PlanConfig::new().roi(Roi::new(0, 0, 0, 10)) ; "largeur nulle")]
    #[test_case(PlanConfig::new().binning(Binning::new(0, 1)) ; "binning nul")]
    fn test_invalid_plans(config: PlanConfig) {
        assert!(matches!(config.build(), Err(AcquisitionError::InvalidPlan(_))));
    }

    #[test]
    fn test_unbounded_plan() {
        let plan = PlanConfig::new().nb_frames(0).build().unwrap();
        assert_eq!(plan.max_frames(), None);
        assert_eq!(plan.to_config().nb_frames, 0);
    }

    #[test]
    fn test_settings_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = AcquisitionSettings {
            session: SessionConfig {
                packet_size: 9000,
                ..SessionConfig::default()
            },
            plan: PlanConfig::new()
                .nb_frames(25)
                .exposure(0.02)
                .latency(0.01)
                .roi(Roi::new(100, 50, 640, 480))
                .binning(Binning::new(2, 2))
                .trigger(TriggerPolicy::line(TriggerLine::Line2))
                .exposure_policy(ExposurePolicy::TriggerWidth),
        };
        settings.save_to_file(&path).unwrap();

        let loaded = AcquisitionSettings::from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_settings_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.toml");
        std::fs::write(
            &path,
            "[session]\npacket_size = 8192\ntrigger = \"software\"\n\n\
             [plan]\nnb_frames = 0\nexposure = 0.25\nroi = \"10,20,320,240\"\npixel_format = \"Mono12\"\n",
        )
        .unwrap();

        let settings = AcquisitionSettings::from_file(&path).unwrap();
        assert_eq!(settings.session.packet_size, 8192);
        assert_eq!(settings.session.inter_packet_delay, 0);
        assert_eq!(settings.session.trigger, TriggerPolicy::Software);

        let plan = settings.plan().unwrap();
        assert_eq!(plan.nb_frames(), 0);
        assert_eq!(plan.roi(), Some(&Roi::new(10, 20, 320, 240)));
        assert_eq!(plan.pixel_format(), PixelFormat::Mono12);
        assert_eq!(plan.latency(), 0.0);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = AcquisitionSettings::from_file("/nonexistent/camctl.json");
        assert!(matches!(result, Err(AcquisitionError::Config(_))));
    }
}
