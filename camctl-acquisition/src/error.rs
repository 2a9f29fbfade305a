//! Gestion des erreurs pour le module d'acquisition
//!
//! Ce module définit les erreurs de configuration et de séquencement, ainsi
//! que leur classification. Le module ne réessaie jamais une opération: la
//! catégorie indique seulement à l'appelant la portée de l'erreur.

use std::io;
use std::time::Duration;

use camctl_camera::CameraError;
use thiserror::Error;

/// Erreur du module d'acquisition
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Registre ou fonctionnalité absent sur cette génération de caméra
    #[error("Fonctionnalité non supportée: {0}")]
    CapabilityUnsupported(String),

    /// Région d'intérêt ou binning hors des bornes du capteur
    #[error("Géométrie invalide: {0}")]
    InvalidGeometry(String),

    /// La récupération d'une image a dépassé son délai
    #[error("Délai dépassé pour l'image {frame} ({timeout:?})")]
    FrameTimeout { frame: u64, timeout: Duration },

    /// Erreur de périphérique ou de transport
    #[error("Erreur de périphérique: {0}")]
    DeviceIo(String),

    /// Plan d'acquisition invalide
    #[error("Plan d'acquisition invalide: {0}")]
    InvalidPlan(String),

    /// Opération incompatible avec l'état courant
    #[error("État invalide: {0}")]
    InvalidState(String),

    /// Erreur de conversion d'image
    #[error("Erreur de conversion: {0}")]
    Conversion(String),

    /// Erreur de chargement de la configuration
    #[error("Erreur de configuration: {0}")]
    Config(#[from] config::ConfigError),

    /// Erreur d'entrée/sortie
    #[error("Erreur d'E/S: {0}")]
    Io(#[from] io::Error),

    /// Erreur de sérialisation/désérialisation
    #[error("Erreur de sérialisation: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<CameraError> for AcquisitionError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::Unsupported(msg) => AcquisitionError::CapabilityUnsupported(msg),
            CameraError::InvalidState(msg) => AcquisitionError::InvalidState(msg),
            other => AcquisitionError::DeviceIo(other.to_string()),
        }
    }
}

/// Catégorie d'erreur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Erreur traitée localement (repli sur un autre registre, écriture bénigne)
    Recoverable,

    /// Erreur propre à une image; l'appelant décide de la suite
    PerFrame,

    /// Erreur qui interrompt la préparation ou la séquence
    Fatal,
}

impl AcquisitionError {
    /// Détermine la catégorie d'une erreur
    pub fn category(&self) -> ErrorCategory {
        match self {
            AcquisitionError::CapabilityUnsupported(_) => ErrorCategory::Recoverable,
            AcquisitionError::FrameTimeout { .. } | AcquisitionError::Conversion(_) => {
                ErrorCategory::PerFrame
            }
            _ => ErrorCategory::Fatal,
        }
    }
}

/// Type résultat du module d'acquisition
pub type Result<T> = std::result::Result<T, AcquisitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_mapping() {
        let err: AcquisitionError = CameraError::Unsupported("ExposureTime".to_string()).into();
        assert!(matches!(err, AcquisitionError::CapabilityUnsupported(ref name) if name == "ExposureTime"));
        assert_eq!(err.category(), ErrorCategory::Recoverable);

        let err: AcquisitionError = CameraError::Device("câble débranché".to_string()).into();
        assert!(matches!(err, AcquisitionError::DeviceIo(ref msg) if msg.contains("câble")));
        assert_eq!(err.category(), ErrorCategory::Fatal);

        let err: AcquisitionError = CameraError::InvalidState("fermée".to_string()).into();
        assert!(matches!(err, AcquisitionError::InvalidState(_)));
    }

    #[test]
    fn test_frame_timeout_is_per_frame() {
        let err = AcquisitionError::FrameTimeout {
            frame: 3,
            timeout: Duration::from_millis(1150),
        };
        assert_eq!(err.category(), ErrorCategory::PerFrame);
        assert!(err.to_string().contains("image 3"));
    }
}
