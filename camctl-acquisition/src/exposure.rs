//! Résolution du temps d'exposition et de la cadence
//!
//! Trois générations de registres de temporisation coexistent chez Basler:
//! `ExposureTime` (USB3 et ace récentes), `ExposureTimeAbs` (ace GigE
//! classiques) et le couple `ExposureTimeBaseAbs` × `ExposureTimeRaw`
//! (scout, pilot). Elles sont essayées dans cet ordre.

use std::fmt;
use std::str::FromStr;

use camctl_camera::{CameraControl, CameraError, RegisterValue};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, Result};
use crate::trigger::TriggerPolicy;

/// Unité du registre `ExposureTimeRaw` utilisée pour le calcul du pas (secondes)
pub const RAW_EXPOSURE_UNIT_S: f64 = 50e-6;

/// Base de temps écrite avant `ExposureTimeRaw` (microsecondes)
pub const DEFAULT_TIME_BASE_US: f64 = 100.0;

/// En dessous de cette latence, la cadence est laissée libre
pub const MIN_LATENCY_S: f64 = 1e-6;

/// Mode d'exposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExposurePolicy {
    /// Exposition temporisée, quel que soit le déclenchement
    #[default]
    Timed,

    /// Avec un déclenchement par ligne, l'exposition dure tant que le
    /// signal est actif
    TriggerWidth,
}

impl fmt::Display for ExposurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposurePolicy::Timed => write!(f, "timed"),
            ExposurePolicy::TriggerWidth => write!(f, "trigger-width"),
        }
    }
}

impl FromStr for ExposurePolicy {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "timed" => Ok(ExposurePolicy::Timed),
            "trigger-width" | "triggerwidth" => Ok(ExposurePolicy::TriggerWidth),
            other => Err(AcquisitionError::InvalidPlan(format!(
                "mode d'exposition inconnu: {}",
                other
            ))),
        }
    }
}

/// Registres effectivement utilisés pour l'exposition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureScheme {
    /// `ExposureTime` (µs)
    Direct,

    /// `ExposureTimeAbs` (µs)
    LegacyAbsolute,

    /// `ExposureTimeBaseAbs` (µs) × `ExposureTimeRaw`
    BaseRaw { base_us: f64, raw: i64 },

    /// `ExposureMode = TriggerWidth`, durée fixée par le signal
    Gated,
}

/// Tentative d'écriture: registre testé et fonction d'écriture
pub type Attempt<C, T> = (&'static str, fn(&mut C, f64) -> std::result::Result<T, CameraError>);

/// Essaie chaque tentative dans l'ordre et retourne le premier succès
///
/// Une tentative est sautée si son registre n'est pas modifiable, ou si
/// l'écriture répond `Unsupported`. Toute autre erreur interrompt la
/// recherche.
pub fn first_supported<C, T>(camera: &mut C, value: f64, attempts: &[Attempt<C, T>]) -> Result<T>
where
    C: CameraControl + ?Sized,
{
    let mut tried = Vec::with_capacity(attempts.len());

    for (name, attempt) in attempts {
        tried.push(*name);

        if !camera.is_writable(name) {
            debug!("{} non disponible ({:?})", name, camera.access_mode(name));
            continue;
        }

        match attempt(&mut *camera, value) {
            Ok(result) => return Ok(result),
            Err(e) if e.is_unsupported() => debug!("{} refusé: {}", name, e),
            Err(e) => return Err(e.into()),
        }
    }

    Err(AcquisitionError::CapabilityUnsupported(format!(
        "aucun registre disponible parmi {}",
        tried.join(", ")
    )))
}

/// Valeur de `ExposureTimeRaw` pour une exposition en secondes (au moins 1)
pub fn raw_exposure(exposure: f64) -> i64 {
    ((exposure / RAW_EXPOSURE_UNIT_S).ceil() as i64).max(1)
}

fn write_exposure_time<C: CameraControl + ?Sized>(
    camera: &mut C,
    exposure: f64,
) -> std::result::Result<ExposureScheme, CameraError> {
    camera.set("ExposureTime", RegisterValue::Float(exposure * 1e6))?;
    Ok(ExposureScheme::Direct)
}

fn write_exposure_time_abs<C: CameraControl + ?Sized>(
    camera: &mut C,
    exposure: f64,
) -> std::result::Result<ExposureScheme, CameraError> {
    camera.set("ExposureTimeAbs", RegisterValue::Float(exposure * 1e6))?;
    Ok(ExposureScheme::LegacyAbsolute)
}

fn write_exposure_base_raw<C: CameraControl + ?Sized>(
    camera: &mut C,
    exposure: f64,
) -> std::result::Result<ExposureScheme, CameraError> {
    camera.set("ExposureTimeBaseAbs", RegisterValue::Float(DEFAULT_TIME_BASE_US))?;

    let raw = raw_exposure(exposure);
    camera.set("ExposureTimeRaw", RegisterValue::Integer(raw))?;

    // Base recalculée pour que base × raw donne exactement l'exposition
    let mut base_us = DEFAULT_TIME_BASE_US;
    if exposure > 0.0 {
        base_us = exposure * 1e6 / raw as f64;
        camera.set("ExposureTimeBaseAbs", RegisterValue::Float(base_us))?;
    }

    Ok(ExposureScheme::BaseRaw { base_us, raw })
}

/// Applique le temps d'exposition (secondes)
pub fn apply_exposure<C>(
    camera: &mut C,
    exposure: f64,
    policy: ExposurePolicy,
    trigger: &TriggerPolicy,
) -> Result<ExposureScheme>
where
    C: CameraControl + ?Sized,
{
    if policy == ExposurePolicy::TriggerWidth {
        if let TriggerPolicy::Line { line, .. } = trigger {
            if !camera.is_writable("ExposureMode") {
                return Err(AcquisitionError::CapabilityUnsupported(
                    "ExposureMode non modifiable".to_string(),
                ));
            }
            camera.set("ExposureMode", RegisterValue::symbol("TriggerWidth"))?;
            info!("Exposition pilotée par la largeur du signal sur {}", line);
            return Ok(ExposureScheme::Gated);
        }
        warn!(
            "Exposition TriggerWidth sans déclenchement matériel ({}): exposition temporisée",
            trigger
        );
    }

    if camera.is_writable("ExposureMode") {
        camera.set("ExposureMode", RegisterValue::symbol("Timed"))?;
    }

    let attempts: [Attempt<C, ExposureScheme>; 3] = [
        ("ExposureTime", write_exposure_time),
        ("ExposureTimeAbs", write_exposure_time_abs),
        ("ExposureTimeRaw", write_exposure_base_raw),
    ];
    let scheme = first_supported(camera, exposure, &attempts)?;

    debug!("Exposition de {} s appliquée via {:?}", exposure, scheme);
    Ok(scheme)
}

fn write_frame_rate_abs<C: CameraControl + ?Sized>(
    camera: &mut C,
    rate: f64,
) -> std::result::Result<(), CameraError> {
    camera.set("AcquisitionFrameRateAbs", RegisterValue::Float(rate))
}

fn write_frame_rate<C: CameraControl + ?Sized>(
    camera: &mut C,
    rate: f64,
) -> std::result::Result<(), CameraError> {
    camera.set("AcquisitionFrameRate", RegisterValue::Float(rate))
}

/// Règle la cadence à partir de l'exposition et de la latence (secondes)
///
/// Retourne la cadence appliquée en Hz, ou `None` si la cadence est libre.
pub fn configure_frame_rate<C>(camera: &mut C, exposure: f64, latency: f64) -> Result<Option<f64>>
where
    C: CameraControl + ?Sized,
{
    if latency < MIN_LATENCY_S {
        if camera.is_writable("AcquisitionFrameRateEnable") {
            camera.set("AcquisitionFrameRateEnable", RegisterValue::Boolean(false))?;
        } else {
            debug!("AcquisitionFrameRateEnable absent: cadence déjà libre");
        }
        return Ok(None);
    }

    if !camera.is_writable("AcquisitionFrameRateEnable") {
        return Err(AcquisitionError::CapabilityUnsupported(
            "AcquisitionFrameRateEnable non modifiable".to_string(),
        ));
    }
    camera.set("AcquisitionFrameRateEnable", RegisterValue::Boolean(true))?;

    let rate = 1.0 / (exposure + latency);
    let attempts: [Attempt<C, ()>; 2] = [
        ("AcquisitionFrameRateAbs", write_frame_rate_abs),
        ("AcquisitionFrameRate", write_frame_rate),
    ];
    first_supported(camera, rate, &attempts)?;

    debug!("Cadence fixée à {:.3} Hz", rate);
    Ok(Some(rate))
}

/// Plage d'exposition supportée (secondes)
pub fn exposure_range<C>(camera: &C) -> Result<(f64, f64)>
where
    C: CameraControl + ?Sized,
{
    for name in ["ExposureTime", "ExposureTimeAbs"] {
        if camera.access_mode(name).is_implemented() {
            let limits = camera.limits(name)?;
            return Ok((limits.min * 1e-6, limits.max * 1e-6));
        }
    }

    if camera.access_mode("ExposureTimeRaw").is_implemented()
        && camera.access_mode("ExposureTimeBaseAbs").is_implemented()
    {
        let base = camera.limits("ExposureTimeBaseAbs")?;
        let raw = camera.limits("ExposureTimeRaw")?;
        return Ok((base.min * raw.min * 1e-6, base.max * raw.max * 1e-6));
    }

    Err(AcquisitionError::CapabilityUnsupported(
        "aucun registre d'exposition".to_string(),
    ))
}

/// Plage de latence supportée (secondes)
///
/// La latence maximale correspond à la période de la cadence minimale.
pub fn latency_range<C>(camera: &C) -> Result<(f64, f64)>
where
    C: CameraControl + ?Sized,
{
    for name in ["AcquisitionFrameRateAbs", "AcquisitionFrameRate"] {
        if camera.access_mode(name).is_implemented() {
            let min_rate = camera.limits(name)?.min;
            let max_latency = if min_rate > 0.0 { 1.0 / min_rate } else { 0.0 };
            return Ok((0.0, max_latency));
        }
    }

    Err(AcquisitionError::CapabilityUnsupported(
        "aucun registre de cadence".to_string(),
    ))
}
