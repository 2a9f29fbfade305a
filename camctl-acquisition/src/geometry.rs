//! Normalisation de la géométrie d'acquisition
//!
//! Ce module valide la région d'intérêt et le binning par rapport aux bornes
//! du capteur et les applique sans jamais demander, même transitoirement,
//! une zone telle que offset + taille dépasse le maximum de l'axe.

use std::fmt;
use std::str::FromStr;

use camctl_camera::{CameraControl, PixelFormat, RegisterValue};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, Result};

/// Région d'intérêt (en pixels, après binning)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Roi {
    /// Position X du coin supérieur gauche
    pub x: u32,

    /// Position Y du coin supérieur gauche
    pub y: u32,

    /// Largeur
    pub width: u32,

    /// Hauteur
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Plein format
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Vérifie que la région tient dans les bornes du capteur
    pub fn validate(&self, width_max: u32, height_max: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "dimension nulle dans {}",
                self
            )));
        }

        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        if right > width_max as u64 || bottom > height_max as u64 {
            return Err(AcquisitionError::InvalidGeometry(format!(
                "{} dépasse le capteur {}x{}",
                self, width_max, height_max
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Roi {
    type Err = AcquisitionError;

    /// Format `x,y,w,h`
    fn from_str(s: &str) -> Result<Self> {
        match parse_list(s, "ROI")?.as_slice() {
            [x, y, width, height] => Ok(Roi::new(*x, *y, *width, *height)),
            _ => Err(AcquisitionError::InvalidPlan(format!(
                "ROI attendue au format x,y,w,h: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Roi {
    type Error = AcquisitionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Roi> for String {
    fn from(roi: Roi) -> Self {
        roi.to_string()
    }
}

/// Facteurs de binning horizontal et vertical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Binning {
    pub horizontal: u32,
    pub vertical: u32,
}

impl Binning {
    pub fn new(horizontal: u32, vertical: u32) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }

    pub fn is_unit(&self) -> bool {
        self.horizontal == 1 && self.vertical == 1
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for Binning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.horizontal, self.vertical)
    }
}

impl FromStr for Binning {
    type Err = AcquisitionError;

    /// Format `h,v`
    fn from_str(s: &str) -> Result<Self> {
        match parse_list(s, "binning")?.as_slice() {
            [horizontal, vertical] => Ok(Binning::new(*horizontal, *vertical)),
            _ => Err(AcquisitionError::InvalidPlan(format!(
                "binning attendu au format h,v: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Binning {
    type Error = AcquisitionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Binning> for String {
    fn from(binning: Binning) -> Self {
        binning.to_string()
    }
}

fn parse_list(s: &str, what: &str) -> Result<Vec<u32>> {
    s.split(',')
        .map(|part| {
            part.trim().parse::<u32>().map_err(|e| {
                AcquisitionError::InvalidPlan(format!("{} invalide ({}): {}", what, s, e))
            })
        })
        .collect()
}

/// Applique la géométrie d'acquisition
///
/// Ordre: remise à 1×1 du binning (sans erreur si non supporté), plein
/// format, format de pixel, binning demandé, relecture des maxima puis
/// validation et application de la région d'intérêt. Retourne la région
/// effectivement appliquée. En cas de `InvalidGeometry`, aucune écriture de
/// région n'a eu lieu après la validation.
pub fn normalize_geometry<C>(
    camera: &mut C,
    roi: Option<&Roi>,
    binning: Option<&Binning>,
    pixel_format: PixelFormat,
) -> Result<Roi>
where
    C: CameraControl + ?Sized,
{
    reset_binning(camera)?;

    let (width_max, height_max) = sensor_maxima(camera)?;
    apply_roi(camera, &Roi::full(width_max, height_max))?;

    camera.set("PixelFormat", RegisterValue::symbol(pixel_format.as_str()))?;

    if let Some(binning) = binning.filter(|b| !b.is_unit()) {
        for (name, factor) in [
            ("BinningHorizontal", binning.horizontal),
            ("BinningVertical", binning.vertical),
        ] {
            if !camera.is_writable(name) {
                return Err(AcquisitionError::CapabilityUnsupported(format!(
                    "{} non modifiable (binning {} demandé)",
                    name, binning
                )));
            }
            camera.set(name, RegisterValue::Integer(factor as i64))?;
        }
    }

    // Les maxima dépendent du binning
    let (width_max, height_max) = sensor_maxima(camera)?;
    let target = roi
        .copied()
        .unwrap_or_else(|| Roi::full(width_max, height_max));
    target.validate(width_max, height_max)?;

    apply_roi(camera, &target)?;

    info!(
        "Géométrie appliquée sur {}: ROI {} binning {} format {}",
        camera.device_info().friendly_name,
        target,
        binning.copied().unwrap_or_default(),
        pixel_format
    );
    Ok(target)
}

/// Remet le binning à 1×1 lorsque la caméra le permet
fn reset_binning<C: CameraControl + ?Sized>(camera: &mut C) -> Result<()> {
    for name in ["BinningHorizontal", "BinningVertical"] {
        if !camera.is_writable(name) {
            debug!("{} absent ou non modifiable, remise à 1 ignorée", name);
            continue;
        }
        match camera.set(name, RegisterValue::Integer(1)) {
            Ok(()) => {}
            Err(e) if e.is_unsupported() => debug!("{} non supporté: {}", name, e),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn sensor_maxima<C: CameraControl + ?Sized>(camera: &C) -> Result<(u32, u32)> {
    let width_max = camera.get_i64("WidthMax")?;
    let height_max = camera.get_i64("HeightMax")?;

    let convert = |value: i64, name: &str| {
        u32::try_from(value)
            .map_err(|_| AcquisitionError::DeviceIo(format!("{} invalide: {}", name, value)))
    };
    Ok((convert(width_max, "WidthMax")?, convert(height_max, "HeightMax")?))
}

/// Applique une région d'intérêt, axe par axe
pub fn apply_roi<C: CameraControl + ?Sized>(camera: &mut C, roi: &Roi) -> Result<()> {
    apply_axis(camera, "OffsetX", "Width", roi.x, roi.width)?;
    apply_axis(camera, "OffsetY", "Height", roi.y, roi.height)
}

/// Passe un axe de (offset, taille) à (offset', taille'): la taille est
/// écrite en premier si elle diminue, l'offset en premier sinon
fn apply_axis<C: CameraControl + ?Sized>(
    camera: &mut C,
    offset_name: &str,
    size_name: &str,
    offset: u32,
    size: u32,
) -> Result<()> {
    let current_size = camera.get_i64(size_name)?;
    let offset_value = RegisterValue::Integer(offset as i64);
    let size_value = RegisterValue::Integer(size as i64);

    if (size as i64) < current_size {
        camera.set(size_name, size_value)?;
        camera.set(offset_name, offset_value)?;
    } else {
        camera.set(offset_name, offset_value)?;
        camera.set(size_name, size_value)?;
    }
    Ok(())
}
