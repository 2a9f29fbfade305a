//! Exécution d'une séquence sur une tâche bloquante
//!
//! La récupération des images est bloquante (avec délai borné). Chaque poignée
//! est déplacée sur sa propre tâche `spawn_blocking`; les images sont copiées
//! en `FrameRecord` et transmises par un canal borné, erreurs par image
//! comprises: le lecteur décide d'arrêter la tâche. Plusieurs poignées
//! peuvent tourner en parallèle sans état partagé.

use anyhow::Context;
use camctl_camera::CameraControl;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AcquisitionPlan;
use crate::error::Result;
use crate::frame::FrameRecord;
use crate::handle::CameraHandle;
use crate::sequencer::{AcquisitionReport, StopToken};

/// Séquence en cours d'exécution sur une tâche bloquante
pub struct AcquisitionTask<C: CameraControl> {
    receiver: mpsc::Receiver<Result<FrameRecord>>,
    stop: StopToken,
    join: JoinHandle<(CameraHandle<C>, AcquisitionReport)>,
}

/// Lance la séquence d'un plan sur une tâche dédiée
///
/// `capacity` borne le nombre d'images en attente dans le canal; la séquence
/// attend le lecteur lorsque le canal est plein.
pub fn spawn_acquisition<C>(
    mut handle: CameraHandle<C>,
    plan: AcquisitionPlan,
    capacity: usize,
) -> AcquisitionTask<C>
where
    C: CameraControl + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let stop = StopToken::new();
    let token = stop.clone();

    let join = tokio::task::spawn_blocking(move || {
        let label = handle.label().to_string();
        info!("Tâche d'acquisition lancée pour {}", label);

        let report = {
            let mut acquisition = handle.acquisition(plan).with_stop_token(token);
            while let Some(outcome) = acquisition.next_frame() {
                let record = outcome.and_then(|frame| frame.into_record());
                if sender.blocking_send(record).is_err() {
                    debug!("Lecteur fermé, arrêt de la séquence sur {}", label);
                    break;
                }
            }
            acquisition.stop()
        };

        info!("Tâche d'acquisition terminée pour {}: {}", label, report);
        (handle, report)
    });

    AcquisitionTask {
        receiver,
        stop,
        join,
    }
}

impl<C: CameraControl> AcquisitionTask<C> {
    /// Image suivante, ou `None` lorsque la séquence est terminée
    pub async fn recv(&mut self) -> Option<Result<FrameRecord>> {
        self.receiver.recv().await
    }

    /// Demande l'arrêt; pris en compte avant la récupération suivante
    pub fn stop(&self) {
        self.stop.request_stop();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Attend la fin de la séquence et rend la poignée avec le bilan
    ///
    /// Les images non encore lues sont abandonnées et la séquence s'arrête
    /// à la prochaine image.
    pub async fn join(self) -> anyhow::Result<(CameraHandle<C>, AcquisitionReport)> {
        let AcquisitionTask { receiver, join, .. } = self;
        drop(receiver);
        join.await.context("la tâche d'acquisition s'est interrompue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PlanConfig, SessionConfig};
    use crate::error::AcquisitionError;
    use camctl_camera::SimulatedCamera;

    fn handle(camera: SimulatedCamera) -> CameraHandle<SimulatedCamera> {
        CameraHandle::open(camera.with_sensor(32, 24), SessionConfig::default()).unwrap()
    }

    fn plan(nb_frames: u64) -> AcquisitionPlan {
        PlanConfig::new()
            .nb_frames(nb_frames)
            .exposure(0.001)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_records_are_forwarded() {
        let mut task = spawn_acquisition(handle(SimulatedCamera::gige("sim")), plan(5), 2);

        let mut indices = Vec::new();
        while let Some(record) = task.recv().await {
            let record = record.unwrap();
            assert_eq!(record.data.len(), 32 * 24);
            indices.push(record.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        let (handle, report) = task.join().await.unwrap();
        assert_eq!(report.frames, 5);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        assert_eq!(handle.camera().outstanding_buffers(), 0);
    }

    #[tokio::test]
    async fn test_stop_unbounded_sequence() {
        let mut task = spawn_acquisition(handle(SimulatedCamera::usb3("sim")), plan(0), 1);

        for _ in 0..3 {
            task.recv().await.unwrap().unwrap();
        }
        task.stop();
        while let Some(record) = task.recv().await {
            record.unwrap();
        }

        let (handle, report) = task.join().await.unwrap();
        assert!(report.frames >= 3);
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_forwarded() {
        let mut task = spawn_acquisition(
            handle(SimulatedCamera::gige("sim").time_out_frame(1)),
            plan(4),
            4,
        );

        assert_eq!(task.recv().await.unwrap().unwrap().index, 0);
        assert!(matches!(
            task.recv().await,
            Some(Err(AcquisitionError::FrameTimeout { frame: 1, .. }))
        ));
        let mut indices = Vec::new();
        while let Some(record) = task.recv().await {
            indices.push(record.unwrap().index);
        }
        assert_eq!(indices, vec![2, 3]);

        let (handle, report) = task.join().await.unwrap();
        assert_eq!((report.frames, report.timeouts), (3, 1));
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
    }

    #[tokio::test]
    async fn test_join_without_reading() {
        let task = spawn_acquisition(handle(SimulatedCamera::gige("sim")), plan(0), 1);

        let (handle, _) = task.join().await.unwrap();
        assert!(!handle.camera().is_grabbing());
        assert_eq!(handle.camera().stop_grabbing_calls(), 1);
    }

    #[tokio::test]
    async fn test_independent_handles() {
        let first = spawn_acquisition(handle(SimulatedCamera::gige("cam-1")), plan(3), 4);
        let second = spawn_acquisition(handle(SimulatedCamera::usb3("cam-2")), plan(2), 4);

        let mut tasks = vec![first, second];
        let mut counts = Vec::new();
        for task in tasks.iter_mut() {
            let mut count = 0;
            while let Some(record) = task.recv().await {
                record.unwrap();
                count += 1;
            }
            counts.push(count);
        }
        assert_eq!(counts, vec![3, 2]);

        for task in tasks {
            let (handle, _) = task.join().await.unwrap();
            assert_eq!(handle.camera().stop_grabbing_calls(), 1);
        }
    }
}
