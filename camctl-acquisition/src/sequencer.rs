//! Séquencement de l'acquisition
//!
//! `Idle → Prepared → Grabbing → Stopped`. La séquence prépare la caméra au
//! besoin, démarre la saisie (bornée par `nb_frames` si non nul), puis livre
//! les images une à une. Un dépassement de délai ou une erreur de
//! récupération concerne une seule image: la saisie continue et l'appelant
//! décide de poursuivre ou d'arrêter. L'arrêt de la saisie est émis
//! exactement une fois, à l'épuisement, sur demande d'arrêt ou à la
//! destruction de la séquence.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camctl_camera::{CameraControl, CameraError, GrabResult};
use log::{debug, error, info, warn};
use metrics::{counter, gauge, histogram};

use crate::config::AcquisitionPlan;
use crate::error::{AcquisitionError, Result};
use crate::frame::Frame;
use crate::handle::CameraHandle;

/// Attente maximale de la disponibilité au déclenchement logiciel
pub const TRIGGER_READY_TIMEOUT: Duration = Duration::from_millis(100);

/// État de la séquence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Prepared,
    Grabbing,
    Stopped,
}

/// Demande d'arrêt partagée, observée entre deux récupérations
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bilan d'une séquence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionReport {
    /// Images livrées avec succès
    pub frames: u64,

    /// Saisies en échec (livrées avec leur description d'erreur)
    pub failures: u64,

    /// Récupérations ayant dépassé leur délai
    pub timeouts: u64,

    /// Durée entre le démarrage et l'arrêt de la saisie
    pub elapsed: Duration,
}

impl AcquisitionReport {
    /// Nombre d'images livrées, réussies ou non
    pub fn delivered(&self) -> u64 {
        self.frames + self.failures
    }
}

impl fmt::Display for AcquisitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} images ({} échecs, {} délais dépassés) en {:.3} s",
            self.frames,
            self.failures,
            self.timeouts,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Séquence d'acquisition sur une caméra ouverte
///
/// Une seule image peut être en circulation: `next_frame` emprunte la
/// séquence jusqu'à la restitution de l'image retournée.
pub struct Acquisition<'h, C: CameraControl> {
    handle: &'h mut CameraHandle<C>,
    plan: AcquisitionPlan,
    state: SequencerState,
    stop: StopToken,
    report: AcquisitionReport,
    label: String,
    started: Option<Instant>,
    index: u64,
}

impl<'h, C: CameraControl> Acquisition<'h, C> {
    pub(crate) fn new(handle: &'h mut CameraHandle<C>, plan: AcquisitionPlan) -> Self {
        let label = handle.label().to_string();
        Self {
            handle,
            plan,
            state: SequencerState::Idle,
            stop: StopToken::new(),
            report: AcquisitionReport::default(),
            label,
            started: None,
            index: 0,
        }
    }

    /// Remplace la demande d'arrêt (partagée avec un autre thread)
    pub fn with_stop_token(mut self, token: StopToken) -> Self {
        self.stop = token;
        self
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn plan(&self) -> &AcquisitionPlan {
        &self.plan
    }

    pub fn report(&self) -> &AcquisitionReport {
        &self.report
    }

    /// Applique le plan à la caméra (sans effet si déjà appliqué)
    pub fn prepare(&mut self) -> Result<()> {
        match self.state {
            SequencerState::Idle => {
                self.handle.prepare(&self.plan)?;
                self.state = SequencerState::Prepared;
                Ok(())
            }
            SequencerState::Prepared | SequencerState::Grabbing => Ok(()),
            SequencerState::Stopped => Err(AcquisitionError::InvalidState(
                "séquence terminée".to_string(),
            )),
        }
    }

    /// Démarre la saisie, en préparant la caméra au besoin
    pub fn start(&mut self) -> Result<()> {
        self.prepare()?;
        if self.state == SequencerState::Grabbing {
            return Ok(());
        }

        let max_frames = self.plan.max_frames();
        self.handle.device_mut().start_grabbing(max_frames)?;
        self.state = SequencerState::Grabbing;
        self.started = Some(Instant::now());

        gauge!("camctl.grabbing", 1.0, "camera" => self.label.clone());
        info!(
            "Saisie démarrée sur {} ({})",
            self.label,
            match max_frames {
                Some(n) => format!("{} images", n),
                None => "jusqu'à l'arrêt".to_string(),
            }
        );
        Ok(())
    }

    /// Récupère l'image suivante
    ///
    /// Retourne `None` lorsque la séquence est terminée. Une erreur de
    /// préparation termine la séquence. Un dépassement de délai ou une erreur
    /// de récupération est retourné pour l'image concernée sans arrêter la
    /// saisie; l'indice d'une image dont le délai est dépassé est consommé.
    /// Une saisie en échec est livrée comme une image dont `succeeded()` est
    /// faux.
    pub fn next_frame(&mut self) -> Option<Result<Frame<'_, C>>> {
        match self.state {
            SequencerState::Stopped => return None,
            SequencerState::Idle | SequencerState::Prepared => {
                if let Err(e) = self.start() {
                    error!("Démarrage impossible sur {}: {}", self.label, e);
                    self.finish();
                    return Some(Err(e));
                }
            }
            SequencerState::Grabbing => {}
        }

        if self.stop.is_stop_requested() {
            debug!("Arrêt demandé sur {}", self.label);
            self.finish();
            return None;
        }
        if !self.handle.camera().is_grabbing() {
            debug!("Saisie terminée par la caméra {}", self.label);
            self.finish();
            return None;
        }

        let index = self.index;
        let begin = Instant::now();
        let result = match self.retrieve(index) {
            Ok(result) => result,
            Err(e) => {
                if let AcquisitionError::FrameTimeout { .. } = e {
                    self.index += 1;
                    self.report.timeouts += 1;
                    counter!("camctl.frame_timeouts", 1, "camera" => self.label.clone());
                }
                warn!("Récupération impossible sur {}: {}", self.label, e);
                return Some(Err(e));
            }
        };

        self.index += 1;
        histogram!(
            "camctl.retrieve_time_ms",
            begin.elapsed().as_secs_f64() * 1000.0,
            "camera" => self.label.clone()
        );
        if result.succeeded {
            self.report.frames += 1;
            counter!("camctl.frames", 1, "camera" => self.label.clone());
        } else {
            self.report.failures += 1;
            counter!("camctl.frame_failures", 1, "camera" => self.label.clone());
            warn!(
                "Image {} ignorée sur {}: {}",
                index,
                self.label,
                result.error_description.as_deref().unwrap_or("erreur inconnue")
            );
        }

        Some(Ok(Frame::new(self.handle.device_mut(), result, index)))
    }

    fn retrieve(&mut self, index: u64) -> Result<GrabResult> {
        let camera = self.handle.device_mut();

        if self.plan.trigger().is_software() {
            camera
                .wait_for_frame_trigger_ready(TRIGGER_READY_TIMEOUT)
                .map_err(|e| match e {
                    CameraError::Timeout(timeout) => {
                        AcquisitionError::FrameTimeout { frame: index, timeout }
                    }
                    other => other.into(),
                })?;
            camera.execute("TriggerSoftware")?;
        }

        let timeout = self.plan.frame_timeout();
        camera.retrieve_result(timeout).map_err(|e| match e {
            CameraError::Timeout(_) => AcquisitionError::FrameTimeout {
                frame: index,
                timeout,
            },
            other => other.into(),
        })
    }

    /// Parcourt toute la séquence
    ///
    /// Chaque image est restituée après l'appel de `on_frame`. La première
    /// erreur (récupération, restitution ou `on_frame`) arrête la saisie et
    /// est retournée.
    pub fn run<F>(&mut self, mut on_frame: F) -> Result<AcquisitionReport>
    where
        F: FnMut(&Frame<'_, C>) -> Result<()>,
    {
        loop {
            let handled = match self.next_frame() {
                None => break,
                Some(Ok(frame)) => {
                    let handled = on_frame(&frame);
                    frame.release().and(handled)
                }
                Some(Err(e)) => Err(e),
            };
            if let Err(e) = handled {
                self.finish();
                return Err(e);
            }
        }
        Ok(self.report.clone())
    }

    /// Arrête la séquence et retourne son bilan
    pub fn stop(&mut self) -> AcquisitionReport {
        self.finish();
        self.report.clone()
    }

    fn finish(&mut self) {
        if self.state == SequencerState::Stopped {
            return;
        }

        if self.state == SequencerState::Grabbing {
            if let Err(e) = self.handle.device_mut().stop_grabbing() {
                warn!("Arrêt de la saisie impossible sur {}: {}", self.label, e);
            }
            if let Some(started) = self.started {
                self.report.elapsed = started.elapsed();
            }
            gauge!("camctl.grabbing", 0.0, "camera" => self.label.clone());
            info!("Saisie arrêtée sur {}: {}", self.label, self.report);
        }
        self.state = SequencerState::Stopped;
    }
}

impl<C: CameraControl> Drop for Acquisition<'_, C> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlanConfig, SessionConfig};
    use crate::geometry::Roi;
    use crate::testing::{device_info, MockCamera};
    use crate::trigger::TriggerPolicy;
    use camctl_camera::{AccessMode, RegisterValue, SimulatedCamera};

    fn handle(camera: SimulatedCamera) -> CameraHandle<SimulatedCamera> {
        CameraHandle::open(camera.with_sensor(64, 48), SessionConfig::default()).unwrap()
    }

    fn plan(nb_frames: u64) -> AcquisitionPlan {
        PlanConfig::new()
            .nb_frames(nb_frames)
            .exposure(0.001)
            .build()
            .unwrap()
    }

    #[test]
    fn test_bounded_sequence() {
        let mut handle = handle(SimulatedCamera::gige("sim"));
        let mut acquisition = handle.acquisition(plan(5));

        let mut numbers = Vec::new();
        while let Some(outcome) = acquisition.next_frame() {
            let frame = outcome.unwrap();
            assert!(frame.succeeded());
            numbers.push(frame.index());
        }
        assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
        assert_eq!(acquisition.state(), SequencerState::Stopped);
        assert!(acquisition.next_frame().is_none());

        let report = acquisition.stop();
        assert_eq!(report.frames, 5);
        drop(acquisition);

        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert_eq!(handle.camera().outstanding_buffers(), 0);
    }

    #[test]
    fn test_unbounded_until_stop() {
        let mut handle = handle(SimulatedCamera::usb3("sim"));
        let mut acquisition = handle.acquisition(plan(0));
        let token = acquisition.stop_token();

        let mut count = 0;
        while let Some(outcome) = acquisition.next_frame() {
            outcome.unwrap();
            count += 1;
            if count == 7 {
                token.request_stop();
            }
        }
        drop(acquisition);

        assert_eq!(count, 7);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
    }

    #[test]
    fn test_drop_stops_grabbing_once() {
        let mut handle = handle(SimulatedCamera::gige("sim"));
        {
            let mut acquisition = handle.acquisition(plan(0));
            acquisition.next_frame().unwrap().unwrap();
        }
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert!(!handle.camera().is_grabbing());
    }

    #[test]
    fn test_never_started_does_not_stop() {
        let mut handle = handle(SimulatedCamera::gige("sim"));
        {
            let mut acquisition = handle.acquisition(plan(3));
            acquisition.prepare().unwrap();
            assert_eq!(acquisition.state(), SequencerState::Prepared);
        }
        assert_eq!(handle.camera().stop_grabbing_calls(), 0);
    }

    #[test]
    fn test_second_run_does_not_prepare_again() {
        let mut handle = handle(SimulatedCamera::gige("sim"));

        let mut first = handle.acquisition(plan(2));
        first.prepare().unwrap();
        first.prepare().unwrap();
        first.run(|_| Ok(())).unwrap();
        drop(first);

        let writes = handle.camera().write_count();
        let report = handle.acquisition(plan(2)).run(|_| Ok(())).unwrap();

        assert_eq!(report.frames, 2);
        assert_eq!(handle.camera().write_count(), writes);
        assert_eq!(handle.camera().stop_grabbing_calls(), 2);
    }

    #[test]
    fn test_software_trigger_per_frame() {
        let mut handle = handle(SimulatedCamera::gige("sim"));
        let plan = plan(4).to_config().trigger(TriggerPolicy::Software).build().unwrap();

        let report = handle.acquisition(plan).run(|_| Ok(())).unwrap();

        assert_eq!(report.frames, 4);
        let triggers = handle
            .camera()
            .executed()
            .iter()
            .filter(|command| command.as_str() == "TriggerSoftware")
            .count();
        assert_eq!(triggers, 4);
    }

    #[test]
    fn test_software_trigger_not_ready() {
        let mut handle = handle(SimulatedCamera::gige("sim").with_trigger_never_ready());
        let plan = plan(4).to_config().trigger(TriggerPolicy::Software).build().unwrap();
        let mut acquisition = handle.acquisition(plan);

        for expected in 0..2 {
            let err = acquisition.next_frame().unwrap().unwrap_err();
            assert!(matches!(
                err,
                AcquisitionError::FrameTimeout { frame, timeout }
                    if frame == expected && timeout == TRIGGER_READY_TIMEOUT
            ));
        }
        assert_eq!(acquisition.state(), SequencerState::Grabbing);

        let report = acquisition.stop();
        assert_eq!((report.frames, report.timeouts), (0, 2));
        drop(acquisition);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert!(!handle
            .camera()
            .executed()
            .iter()
            .any(|command| command.as_str() == "TriggerSoftware"));
    }

    #[test]
    fn test_pool_depth_one() {
        let mut handle = handle(SimulatedCamera::gige("sim").with_pool_depth(1));
        let report = handle.acquisition(plan(6)).run(|_| Ok(())).unwrap();
        assert_eq!(report.frames, 6);
    }

    #[test]
    fn test_sequence_continues_after_frame_timeout() {
        let mut handle = handle(SimulatedCamera::gige("sim").time_out_frame(1));
        let mut acquisition = handle.acquisition(plan(5));

        let mut delivered = Vec::new();
        let mut timed_out = Vec::new();
        while let Some(outcome) = acquisition.next_frame() {
            match outcome {
                Ok(frame) => delivered.push(frame.index()),
                Err(AcquisitionError::FrameTimeout { frame, timeout }) => {
                    assert_eq!(timeout, Duration::from_millis(1001));
                    timed_out.push(frame);
                }
                Err(e) => panic!("erreur inattendue: {}", e),
            }
        }

        assert_eq!(delivered, vec![0, 2, 3, 4]);
        assert_eq!(timed_out, vec![1]);
        let report = acquisition.stop();
        assert_eq!((report.frames, report.timeouts), (4, 1));
        drop(acquisition);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert_eq!(handle.camera().outstanding_buffers(), 0);
    }

    #[test]
    fn test_run_aborts_on_frame_timeout() {
        let mut handle = handle(SimulatedCamera::gige("sim").time_out_frame(1));

        let mut seen = 0;
        let result = handle.acquisition(plan(5)).run(|_| {
            seen += 1;
            Ok(())
        });

        assert!(matches!(
            result,
            Err(AcquisitionError::FrameTimeout { frame: 1, .. })
        ));
        assert_eq!(seen, 1);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert_eq!(handle.camera().outstanding_buffers(), 0);
    }

    #[test]
    fn test_failed_grab_continues() {
        let mut handle = handle(SimulatedCamera::gige("sim").fail_frame(1, "Tampon incomplet"));
        let mut acquisition = handle.acquisition(plan(3));

        let mut outcomes = Vec::new();
        while let Some(outcome) = acquisition.next_frame() {
            let frame = outcome.unwrap();
            outcomes.push((frame.succeeded(), frame.error_description().map(str::to_string)));
        }

        assert_eq!(
            outcomes,
            vec![
                (true, None),
                (false, Some("Tampon incomplet".to_string())),
                (true, None),
            ]
        );
        assert_eq!(acquisition.report().failures, 1);
        assert_eq!(acquisition.report().delivered(), 3);
    }

    #[test]
    fn test_prepare_error_is_reported_once() {
        let mut handle = handle(SimulatedCamera::gige("sim"));
        let bad = PlanConfig::new()
            .roi(Roi::new(32, 0, 64, 48))
            .build()
            .unwrap();
        let mut acquisition = handle.acquisition(bad);

        assert!(matches!(
            acquisition.next_frame(),
            Some(Err(AcquisitionError::InvalidGeometry(_)))
        ));
        assert!(acquisition.next_frame().is_none());
        drop(acquisition);
        assert_eq!(handle.camera().stop_grabbing_calls(), 0);
    }

    #[test]
    fn test_run_stops_on_callback_error() {
        let mut handle = handle(SimulatedCamera::gige("sim"));
        let mut acquisition = handle.acquisition(plan(0));

        let mut seen = 0;
        let result = acquisition.run(|_| {
            seen += 1;
            if seen == 3 {
                Err(AcquisitionError::Conversion("arrêt".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        drop(acquisition);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert_eq!(handle.camera().outstanding_buffers(), 0);
    }

    #[test]
    fn test_device_error_is_per_frame() {
        let grabbing = Arc::new(AtomicBool::new(false));

        let mut camera = MockCamera::new();
        camera.expect_device_info().return_const(device_info());
        camera.expect_open().returning(|| Ok(()));
        camera.expect_access_mode().returning(|_| AccessMode::ReadWrite);
        camera.expect_get().returning(|_| Ok(RegisterValue::Integer(64)));
        camera.expect_set().returning(|_, _| Ok(()));
        camera
            .expect_symbolics()
            .returning(|_| Ok(vec!["FrameStart".to_string()]));

        let flag = grabbing.clone();
        camera
            .expect_is_grabbing()
            .returning(move || flag.load(Ordering::SeqCst));
        let flag = grabbing.clone();
        camera
            .expect_start_grabbing()
            .withf(|max_frames: &Option<u64>| *max_frames == Some(3))
            .times(1)
            .returning(move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
        camera
            .expect_retrieve_result()
            .times(2)
            .returning(|_| Err(CameraError::Device("câble débranché".to_string())));
        let flag = grabbing.clone();
        camera
            .expect_stop_grabbing()
            .times(1)
            .returning(move || {
                flag.store(false, Ordering::SeqCst);
                Ok(())
            });

        let mut handle = CameraHandle::open(camera, SessionConfig::default()).unwrap();
        let mut acquisition = handle.acquisition(plan(3));

        for _ in 0..2 {
            assert!(matches!(
                acquisition.next_frame(),
                Some(Err(AcquisitionError::DeviceIo(_)))
            ));
        }
        assert_eq!(acquisition.state(), SequencerState::Grabbing);

        let report = acquisition.stop();
        assert_eq!((report.delivered(), report.timeouts), (0, 0));
        assert!(acquisition.next_frame().is_none());
    }
}
