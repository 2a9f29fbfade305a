//! Réglage du flux réseau (GigE Vision)
//!
//! Taille des paquets, délai inter-paquets, délai de transmission des images
//! et profondeur de la file de sortie. Appliqué une seule fois par session,
//! uniquement pour les caméras à transport réseau. Les échecs sont
//! journalisés et n'empêchent jamais la suite de la configuration.

use camctl_camera::{CameraControl, RegisterValue};
use log::{info, warn};

use crate::config::SessionConfig;

/// Résultat du réglage réseau
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkTuning {
    /// Registres écrits avec succès
    pub applied: Vec<&'static str>,

    /// Registres en échec, avec la description de l'erreur
    pub failed: Vec<(&'static str, String)>,
}

impl NetworkTuning {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applique les paramètres réseau de la session
///
/// Retourne `None` pour une caméra qui n'est pas à transport réseau.
pub fn tune_network<C>(camera: &mut C, session: &SessionConfig) -> Option<NetworkTuning>
where
    C: CameraControl + ?Sized,
{
    let info = camera.device_info();
    if !info.transport.is_network() {
        return None;
    }
    let name = info.friendly_name.clone();

    info!("Optimisation des paramètres réseau pour la caméra {}", name);

    let settings: [(&'static str, i64); 4] = [
        ("GevSCPSPacketSize", session.packet_size as i64),
        ("GevSCPD", session.inter_packet_delay as i64),
        ("GevSCFTD", session.frame_transmission_delay as i64),
        ("OutputQueueSize", session.output_queue_size as i64),
    ];

    let mut tuning = NetworkTuning::default();
    for (register, value) in settings {
        match camera.set(register, RegisterValue::Integer(value)) {
            Ok(()) => tuning.applied.push(register),
            Err(e) => {
                warn!("Impossible de régler {} = {} sur {}: {}", register, value, name, e);
                tuning.failed.push((register, e.to_string()));
            }
        }
    }

    info!(
        "Paramètres réseau appliqués pour la caméra {} ({} / {})",
        name,
        tuning.applied.len(),
        settings.len()
    );
    Some(tuning)
}
