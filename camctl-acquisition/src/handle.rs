//! Poignée de caméra ouverte
//!
//! Une `CameraHandle` possède une caméra ouverte et la configuration de
//! session. Le réglage réseau est appliqué une seule fois à l'ouverture; la
//! préparation d'un plan (géométrie, exposition, cadence, déclenchement) n'est
//! appliquée qu'une fois tant que le plan ne change pas.

use camctl_camera::{
    build_parameter_tree, BoxedCamera, CameraControl, DeviceFactory, DeviceInfo, DeviceSelector,
    ParameterNode,
};
use log::{debug, info, warn};

use crate::config::{AcquisitionPlan, SessionConfig};
use crate::error::{AcquisitionError, Result};
use crate::exposure::{apply_exposure, configure_frame_rate, ExposureScheme};
use crate::geometry::{normalize_geometry, Roi};
use crate::network::{tune_network, NetworkTuning};
use crate::sequencer::Acquisition;
use crate::trigger::{set_trigger, TriggerState};

/// Configuration effectivement appliquée par la dernière préparation
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedState {
    /// Région d'intérêt appliquée
    pub roi: Roi,

    /// Méthode d'exposition retenue
    pub exposure: ExposureScheme,

    /// Cadence programmée (None si la cadence est libre)
    pub frame_rate: Option<f64>,
}

/// Caméra ouverte et configurée pour une session
pub struct CameraHandle<C: CameraControl> {
    camera: C,
    session: SessionConfig,
    network: Option<NetworkTuning>,
    trigger_state: Option<TriggerState>,
    plan: Option<AcquisitionPlan>,
    prepared: Option<PreparedState>,
}

impl<C: CameraControl> CameraHandle<C> {
    /// Ouvre la caméra et applique la configuration de session
    ///
    /// Seule l'ouverture peut échouer: le réglage réseau et le déclenchement
    /// de session sont appliqués au mieux.
    pub fn open(mut camera: C, session: SessionConfig) -> Result<Self> {
        camera.open()?;
        info!("Caméra ouverte: {}", camera.device_info().friendly_name);

        let network = tune_network(&mut camera, &session);
        let trigger_state = match set_trigger(&mut camera, &session.trigger) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "Déclenchement de session non appliqué sur {}: {}",
                    camera.device_info().friendly_name,
                    e
                );
                None
            }
        };

        Ok(Self {
            camera,
            session,
            network,
            trigger_state,
            plan: None,
            prepared: None,
        })
    }

    /// Informations d'identification de la caméra
    pub fn device_info(&self) -> &DeviceInfo {
        self.camera.device_info()
    }

    /// Description complète de la caméra, une propriété par ligne
    pub fn description(&self) -> String {
        self.camera.device_info().to_string()
    }

    /// Nom court utilisé dans les journaux et les métriques
    pub fn label(&self) -> &str {
        &self.camera.device_info().friendly_name
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Résultat du réglage réseau (None hors GigE)
    pub fn network_tuning(&self) -> Option<&NetworkTuning> {
        self.network.as_ref()
    }

    /// Dernier état de déclenchement appliqué
    pub fn trigger_state(&self) -> Option<TriggerState> {
        self.trigger_state
    }

    /// Plan actuellement appliqué à la caméra
    pub fn prepared_plan(&self) -> Option<&AcquisitionPlan> {
        self.plan.as_ref()
    }

    pub fn prepared_state(&self) -> Option<&PreparedState> {
        self.prepared.as_ref()
    }

    pub fn is_prepared(&self, plan: &AcquisitionPlan) -> bool {
        self.plan.as_ref() == Some(plan)
    }

    /// Oublie la préparation courante; la prochaine sera réappliquée
    pub fn invalidate(&mut self) {
        self.plan = None;
        self.prepared = None;
    }

    /// Applique un plan d'acquisition
    ///
    /// Retourne `false` si ce plan était déjà appliqué (aucune écriture).
    /// En cas d'erreur, la préparation est oubliée et sera entièrement
    /// reprise au prochain appel.
    pub fn prepare(&mut self, plan: &AcquisitionPlan) -> Result<bool> {
        if self.is_prepared(plan) {
            debug!("Plan déjà appliqué sur {}", self.label());
            return Ok(false);
        }
        if self.camera.is_grabbing() {
            return Err(AcquisitionError::InvalidState(
                "préparation impossible pendant la saisie".to_string(),
            ));
        }

        self.invalidate();

        let roi = normalize_geometry(
            &mut self.camera,
            plan.roi(),
            plan.binning(),
            plan.pixel_format(),
        )?;
        let exposure = apply_exposure(
            &mut self.camera,
            plan.exposure(),
            plan.exposure_policy(),
            plan.trigger(),
        )?;
        let frame_rate = configure_frame_rate(&mut self.camera, plan.exposure(), plan.latency())?;

        if let Some(state) = set_trigger(&mut self.camera, plan.trigger())? {
            self.trigger_state = Some(state);
        }

        info!(
            "Plan appliqué sur {}: {} images, exposition {} s, zone {}, déclenchement {}",
            self.label(),
            plan.nb_frames(),
            plan.exposure(),
            roi,
            plan.trigger()
        );

        self.plan = Some(plan.clone());
        self.prepared = Some(PreparedState {
            roi,
            exposure,
            frame_rate,
        });
        Ok(true)
    }

    /// Crée une séquence d'acquisition sur cette caméra
    pub fn acquisition(&mut self, plan: AcquisitionPlan) -> Acquisition<'_, C> {
        Acquisition::new(self, plan)
    }

    /// Arbre des paramètres de la caméra, filtré sur les feuilles
    pub fn parameter_tree<F>(&self, filter: F) -> Result<Option<ParameterNode>>
    where
        F: Fn(&ParameterNode) -> bool,
    {
        Ok(build_parameter_tree(&self.camera, filter)?)
    }

    /// Écrit un paramètre à partir de sa forme textuelle
    pub fn set_parameter_str(&mut self, name: &str, text: &str) -> Result<()> {
        let schema = self.camera.parameter_schema()?;
        let descriptor = schema
            .find(name)
            .ok_or_else(|| AcquisitionError::CapabilityUnsupported(name.to_string()))?;

        let entries = self.camera.symbolics(name).unwrap_or_default();
        let value = descriptor.encode(text, &entries)?;

        debug!("{} = {} sur {}", name, value, self.label());
        self.camera.set(name, value)?;
        self.invalidate();
        Ok(())
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// Accès direct à la caméra; la préparation courante est oubliée
    pub fn camera_mut(&mut self) -> &mut C {
        self.invalidate();
        &mut self.camera
    }

    pub(crate) fn device_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    /// Ferme la caméra
    pub fn close(&mut self) -> Result<()> {
        if self.camera.is_grabbing() {
            warn!("Saisie encore active à la fermeture de {}", self.label());
            self.camera.stop_grabbing()?;
        }
        self.camera.close()?;
        self.invalidate();
        info!("Caméra fermée: {}", self.label());
        Ok(())
    }

    /// Rend la caméra sans la fermer
    pub fn into_inner(self) -> C {
        self.camera
    }
}

impl CameraHandle<BoxedCamera> {
    /// Ouvre la première caméra qui correspond au sélecteur
    pub fn open_with<F>(factory: &F, selector: &DeviceSelector, session: SessionConfig) -> Result<Self>
    where
        F: DeviceFactory + ?Sized,
    {
        let camera = factory.create_first(selector).map_err(|e| {
            warn!("Aucune caméra pour {}: {}", selector, e);
            AcquisitionError::from(e)
        })?;
        Self::open(camera, session)
    }
}
