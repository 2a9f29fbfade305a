//! Images récupérées
//!
//! Une `Frame` emprunte la caméra jusqu'à sa restitution: son tampon est
//! rendu au pool de la caméra par `release()`, `into_record()` ou à la
//! destruction. Une `FrameRecord` est une copie possédée, transmissible entre
//! threads et utilisable après la restitution.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use camctl_camera::{CameraControl, GrabResult, PixelFormat};
use image::{ImageBuffer, Luma};
use log::warn;
use ndarray::Array2;

use crate::error::{AcquisitionError, Result};

/// Image récupérée, liée à la caméra tant qu'elle n'est pas restituée
pub struct Frame<'a, C: CameraControl + ?Sized> {
    camera: &'a mut C,
    result: Option<GrabResult>,
    index: u64,
    timestamp: SystemTime,
}

impl<'a, C: CameraControl + ?Sized> Frame<'a, C> {
    pub(crate) fn new(camera: &'a mut C, result: GrabResult, index: u64) -> Self {
        Self {
            camera,
            result: Some(result),
            index,
            timestamp: SystemTime::now(),
        }
    }

    fn grab(&self) -> &GrabResult {
        // Le résultat n'est retiré que par les méthodes qui consomment la Frame
        match &self.result {
            Some(result) => result,
            None => unreachable!("résultat déjà restitué"),
        }
    }

    /// Position de l'image dans la séquence (à partir de 0)
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Numéro attribué par la caméra
    pub fn frame_number(&self) -> u64 {
        self.grab().frame_number
    }

    pub fn succeeded(&self) -> bool {
        self.grab().succeeded
    }

    pub fn width(&self) -> u32 {
        self.grab().width
    }

    pub fn height(&self) -> u32 {
        self.grab().height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.grab().pixel_format
    }

    /// Données brutes du tampon
    pub fn data(&self) -> &[u8] {
        &self.grab().data
    }

    /// Description de l'erreur d'une saisie en échec
    pub fn error_description(&self) -> Option<&str> {
        self.grab().error_description.as_deref()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Copie possédée de l'image
    pub fn to_record(&self) -> FrameRecord {
        FrameRecord::from_grab(self.grab().clone(), self.index, self.timestamp)
    }

    /// Restitue le tampon et retourne l'image possédée
    pub fn into_record(mut self) -> Result<FrameRecord> {
        let result = self.take_and_release()?;
        Ok(FrameRecord::from_grab(result, self.index, self.timestamp))
    }

    /// Restitue explicitement le tampon à la caméra
    pub fn release(mut self) -> Result<()> {
        self.take_and_release().map(|_| ())
    }

    fn take_and_release(&mut self) -> Result<GrabResult> {
        match self.result.take() {
            Some(result) => {
                self.camera.release_result(result.buffer)?;
                Ok(result)
            }
            None => Err(AcquisitionError::InvalidState(
                "image déjà restituée".to_string(),
            )),
        }
    }
}

impl<C: CameraControl + ?Sized> Drop for Frame<'_, C> {
    fn drop(&mut self) {
        if let Some(result) = self.result.take() {
            if let Err(e) = self.camera.release_result(result.buffer) {
                warn!("Restitution du tampon {:?} impossible: {}", result.buffer, e);
            }
        }
    }
}

impl<C: CameraControl + ?Sized> fmt::Debug for Frame<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("result", &self.result.as_ref().map(|r| (r.buffer, r.succeeded)))
            .finish()
    }
}

/// Image possédée, détachée de la caméra
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Position dans la séquence
    pub index: u64,

    /// Numéro attribué par la caméra
    pub frame_number: u64,

    pub succeeded: bool,

    pub width: u32,

    pub height: u32,

    pub pixel_format: PixelFormat,

    /// Données brutes de l'image
    pub data: Vec<u8>,

    pub error_description: Option<String>,

    /// Horodatage de la récupération
    pub timestamp: SystemTime,
}

impl FrameRecord {
    fn from_grab(result: GrabResult, index: u64, timestamp: SystemTime) -> Self {
        Self {
            index,
            frame_number: result.frame_number,
            succeeded: result.succeeded,
            width: result.width,
            height: result.height,
            pixel_format: result.pixel_format,
            data: result.data,
            error_description: result.error_description,
            timestamp,
        }
    }

    fn require_mono8(&self, operation: &str) -> Result<()> {
        if !self.succeeded {
            return Err(AcquisitionError::Conversion(format!(
                "image {} en échec, {} impossible",
                self.index, operation
            )));
        }
        if self.pixel_format != PixelFormat::Mono8 {
            return Err(AcquisitionError::Conversion(format!(
                "Seul le format Mono8 est supporté pour {} (format {})",
                operation, self.pixel_format
            )));
        }
        Ok(())
    }

    /// Convertit l'image en tableau ndarray 2D (niveaux de gris)
    pub fn to_ndarray2(&self) -> Result<Array2<u8>> {
        self.require_mono8("la conversion en Array2")?;

        let shape = (self.height as usize, self.width as usize);
        Array2::from_shape_vec(shape, self.data.clone()).map_err(|e| {
            AcquisitionError::Conversion(format!("Erreur de conversion en ndarray: {}", e))
        })
    }

    /// Convertit l'image en ImageBuffer (crate image)
    pub fn to_image_buffer(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        self.require_mono8("la conversion en ImageBuffer")?;

        ImageBuffer::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            AcquisitionError::Conversion("Erreur de conversion en ImageBuffer".to_string())
        })
    }

    /// Enregistre l'image dans un fichier (format déduit de l'extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let img = self.to_image_buffer()?;
        img.save(path)
            .map_err(|e| AcquisitionError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }

    /// Calcule l'histogramme de l'image
    pub fn histogram(&self) -> Result<[u32; 256]> {
        self.require_mono8("le calcul d'histogramme")?;

        let mut hist = [0u32; 256];
        for &pixel in &self.data {
            hist[pixel as usize] += 1;
        }
        Ok(hist)
    }

    /// Calcule la valeur moyenne de l'image
    pub fn mean(&self) -> Result<f64> {
        self.require_mono8("le calcul de moyenne")?;

        if self.data.is_empty() {
            return Ok(0.0);
        }
        let sum: u64 = self.data.iter().map(|&p| p as u64).sum();
        Ok(sum as f64 / self.data.len() as f64)
    }
}

impl fmt::Display for FrameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.succeeded {
            write!(
                f,
                "Image {}: {}x{} {}",
                self.index, self.width, self.height, self.pixel_format
            )
        } else {
            write!(
                f,
                "Image {}: échec ({})",
                self.index,
                self.error_description.as_deref().unwrap_or("erreur inconnue")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camctl_camera::{SimulatedCamera, CameraError};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn grabbing_camera() -> SimulatedCamera {
        let mut camera = SimulatedCamera::gige("sim")
            .with_sensor(16, 8)
            .with_pool_depth(1);
        camera.open().unwrap();
        camera.start_grabbing(None).unwrap();
        camera
    }

    fn grab(camera: &mut SimulatedCamera) -> GrabResult {
        camera.retrieve_result(TIMEOUT).unwrap()
    }

    #[test]
    fn test_drop_releases_buffer() {
        let mut camera = grabbing_camera();
        let result = grab(&mut camera);
        {
            let frame = Frame::new(&mut camera, result, 0);
            assert!(frame.succeeded());
            assert_eq!(frame.data().len(), 16 * 8);
        }
        assert_eq!(camera.outstanding_buffers(), 0);
    }

    #[test]
    fn test_explicit_release() {
        let mut camera = grabbing_camera();
        let result = grab(&mut camera);
        Frame::new(&mut camera, result, 0).release().unwrap();

        assert_eq!(camera.outstanding_buffers(), 0);
        assert!(camera.retrieve_result(TIMEOUT).is_ok());
    }

    #[test]
    fn test_into_record_keeps_data() {
        let mut camera = grabbing_camera();
        let result = grab(&mut camera);
        let record = Frame::new(&mut camera, result, 7).into_record().unwrap();

        assert_eq!(camera.outstanding_buffers(), 0);
        assert_eq!(record.index, 7);
        assert_eq!((record.width, record.height), (16, 8));

        let array = record.to_ndarray2().unwrap();
        assert_eq!(array.shape(), &[8, 16]);
        assert_eq!(array[[1, 2]], 3);

        let hist = record.histogram().unwrap();
        assert_eq!(hist.iter().sum::<u32>(), 16 * 8);
        assert!(record.mean().unwrap() > 0.0);
        assert_eq!(record.to_string(), "Image 7: 16x8 Mono8");
    }

    #[test]
    fn test_record_save_png() {
        let mut camera = grabbing_camera();
        let result = grab(&mut camera);
        let record = Frame::new(&mut camera, result, 0).into_record().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        record.save(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_failed_frame_record() {
        let mut camera = SimulatedCamera::gige("sim")
            .with_sensor(16, 8)
            .fail_frame(0, "Paquets perdus");
        camera.open().unwrap();
        camera.start_grabbing(None).unwrap();

        let result = grab(&mut camera);
        let record = Frame::new(&mut camera, result, 0).into_record().unwrap();

        assert!(!record.succeeded);
        assert_eq!(record.to_string(), "Image 0: échec (Paquets perdus)");
        assert!(matches!(record.to_ndarray2(), Err(AcquisitionError::Conversion(_))));
    }

    #[test]
    fn test_release_error_is_reported() {
        let mut camera = grabbing_camera();
        let result = grab(&mut camera);
        let buffer = result.buffer;
        camera.release_result(buffer).unwrap();

        let err = Frame::new(&mut camera, result, 0).release().unwrap_err();
        assert!(matches!(err, AcquisitionError::DeviceIo(_)));
        assert!(matches!(
            camera.release_result(buffer),
            Err(CameraError::InvalidValue { .. })
        ));
    }
}
