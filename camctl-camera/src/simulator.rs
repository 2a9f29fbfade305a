//! Caméra simulée
//!
//! Modèle de registres GenICam en mémoire qui reproduit trois générations de
//! caméras Basler. Les écritures sont journalisées, le pool de tampons est
//! borné et le déclenchement logiciel est respecté lors de la récupération.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, info, trace};

use crate::params::{FeatureDescriptor, FeatureKind, SchemaNode};
use crate::{
    AccessMode, BoxedCamera, BufferId, CameraControl, CameraError, DeviceFactory, DeviceInfo,
    GrabResult, Limits, PixelFormat, RegisterValue, Transport,
};

/// Registres dont la valeur dépend du `TriggerSelector` courant
const TRIGGER_SCOPED: [&str; 3] = ["TriggerMode", "TriggerSource", "TriggerActivation"];

/// Registres verrouillés pendant la saisie
const LOCKED_WHILE_GRABBING: [&str; 7] = [
    "Width",
    "Height",
    "OffsetX",
    "OffsetY",
    "BinningHorizontal",
    "BinningVertical",
    "PixelFormat",
];

const CATEGORIES: [(&str, &str); 4] = [
    ("DeviceControl", "Device Control"),
    ("ImageFormatControl", "Image Format Control"),
    ("AcquisitionControl", "Acquisition Control"),
    ("TransportLayerControl", "Transport Layer Control"),
];

const COMMANDS: [&str; 3] = ["TriggerSoftware", "AcquisitionStart", "AcquisitionStop"];

/// Génération de caméra simulée (schéma des registres de temporisation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingGeneration {
    /// ace USB3: `ExposureTime`, `AcquisitionFrameRate`
    Usb3Ace,
    /// ace GigE classique: `ExposureTimeAbs`, `AcquisitionFrameRateAbs`
    AceGigE,
    /// scout/pilot GigE: `ExposureTimeBaseAbs` × `ExposureTimeRaw`
    ScoutGigE,
}

impl TimingGeneration {
    fn model_name(self) -> &'static str {
        match self {
            TimingGeneration::Usb3Ace => "acA1920-40um",
            TimingGeneration::AceGigE => "acA1920-25gm",
            TimingGeneration::ScoutGigE => "scA1300-32gm",
        }
    }

    fn transport(self) -> Transport {
        match self {
            TimingGeneration::Usb3Ace => Transport::Usb3,
            TimingGeneration::AceGigE | TimingGeneration::ScoutGigE => Transport::GigE,
        }
    }
}

#[derive(Debug, Clone)]
struct Register {
    descriptor: FeatureDescriptor,
    category: &'static str,
    value: RegisterValue,
    access: AccessMode,
    limits: Option<Limits>,
    entries: Vec<String>,
}

impl Register {
    fn bounded(&mut self, min: f64, max: f64, inc: Option<f64>) -> &mut Self {
        self.limits = Some(Limits { min, max, inc });
        self
    }

    fn entries(&mut self, entries: &[&str]) -> &mut Self {
        self.entries = entries.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Vérifie le type, les entrées et les bornes d'une valeur à écrire
    fn coerce(&self, value: RegisterValue) -> Result<RegisterValue, CameraError> {
        let invalid = |reason: String| CameraError::InvalidValue {
            name: self.descriptor.name.clone(),
            reason,
        };

        let value = match (self.descriptor.kind, value) {
            (FeatureKind::Integer, RegisterValue::Integer(v)) => RegisterValue::Integer(v),
            (FeatureKind::Float, RegisterValue::Float(v)) => RegisterValue::Float(v),
            (FeatureKind::Float, RegisterValue::Integer(v)) => RegisterValue::Float(v as f64),
            (FeatureKind::Boolean, RegisterValue::Boolean(v)) => RegisterValue::Boolean(v),
            (
                FeatureKind::Enumeration,
                RegisterValue::Enumeration(v) | RegisterValue::String(v),
            ) => {
                if !self.entries.contains(&v) {
                    return Err(invalid(format!("entrée inconnue: {}", v)));
                }
                RegisterValue::Enumeration(v)
            }
            (FeatureKind::String, RegisterValue::String(v) | RegisterValue::Enumeration(v)) => {
                RegisterValue::String(v)
            }
            (kind, other) => return Err(invalid(format!("{:?} attendu, obtenu {}", kind, other))),
        };

        if let (Some(limits), Some(v)) = (self.limits, value.as_f64()) {
            if !v.is_finite() || v < limits.min || v > limits.max {
                return Err(invalid(format!(
                    "{} hors de [{}, {}]",
                    v, limits.min, limits.max
                )));
            }
        }

        Ok(value)
    }
}

/// Caméra simulée pour les tests
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    info: DeviceInfo,
    generation: TimingGeneration,
    registers: HashMap<String, Register>,
    /// Ordre de déclaration des registres (ordre du schéma)
    order: Vec<String>,
    /// Valeurs des registres de déclenchement par sélecteur
    trigger_slots: HashMap<String, HashMap<String, RegisterValue>>,
    sensor: (i64, i64),
    is_open: bool,
    grabbing: bool,
    max_frames: Option<u64>,
    delivered: u64,
    pool_depth: usize,
    outstanding: HashSet<u64>,
    next_buffer: u64,
    pending_triggers: u32,
    trigger_ready: bool,
    failing_frames: HashMap<u64, String>,
    timeout_frames: HashSet<u64>,
    writes: Vec<(String, RegisterValue)>,
    executed: Vec<String>,
    stop_calls: usize,
}

impl SimulatedCamera {
    /// Crée une caméra simulée de la génération indiquée
    pub fn new(serial: &str, generation: TimingGeneration) -> Self {
        info!(
            "Création d'une caméra simulée: {} ({:?})",
            serial, generation
        );

        let model = generation.model_name();
        let transport = generation.transport();
        let info = DeviceInfo {
            friendly_name: format!("Basler {} ({})", model, serial),
            full_name: format!("sim#{}#{}", model, serial),
            model_name: model.to_string(),
            vendor_name: "Basler".to_string(),
            serial_number: serial.to_string(),
            user_defined_name: String::new(),
            device_class: match transport {
                Transport::GigE => "BaslerGigE",
                _ => "BaslerUsb",
            }
            .to_string(),
            ip_address: transport
                .is_network()
                .then(|| Ipv4Addr::new(192, 168, 1, 10)),
            transport,
        };

        let mut camera = Self {
            info,
            generation,
            registers: HashMap::new(),
            order: Vec::new(),
            trigger_slots: HashMap::new(),
            sensor: (1920, 1080),
            is_open: false,
            grabbing: false,
            max_frames: None,
            delivered: 0,
            pool_depth: 10,
            outstanding: HashSet::new(),
            next_buffer: 0,
            pending_triggers: 0,
            trigger_ready: true,
            failing_frames: HashMap::new(),
            timeout_frames: HashSet::new(),
            writes: Vec::new(),
            executed: Vec::new(),
            stop_calls: 0,
        };
        camera.populate();
        camera
    }

    /// ace GigE classique
    pub fn gige(serial: &str) -> Self {
        Self::new(serial, TimingGeneration::AceGigE)
    }

    /// ace USB3
    pub fn usb3(serial: &str) -> Self {
        Self::new(serial, TimingGeneration::Usb3Ace)
    }

    /// scout GigE (temps d'exposition base × raw)
    pub fn scout(serial: &str) -> Self {
        Self::new(serial, TimingGeneration::ScoutGigE)
    }

    fn define(
        &mut self,
        category: &'static str,
        descriptor: FeatureDescriptor,
        access: AccessMode,
        value: RegisterValue,
    ) -> &mut Register {
        let name = descriptor.name.clone();
        if !self.registers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.registers.entry(name).or_insert(Register {
            descriptor,
            category,
            value,
            access,
            limits: None,
            entries: Vec::new(),
        })
    }

    fn populate(&mut self) {
        use AccessMode::{ReadOnly, ReadWrite};
        use FeatureKind::{Boolean, Enumeration, Float, Integer, String as Text};

        let (width, height) = self.sensor;
        let serial = self.info.serial_number.clone();
        let model = self.info.model_name.clone();

        // Identification
        let device = "DeviceControl";
        self.define(device, FeatureDescriptor::new("DeviceModelName", "Model Name", Text), ReadOnly, RegisterValue::String(model));
        self.define(device, FeatureDescriptor::new("DeviceSerialNumber", "Serial Number", Text), ReadOnly, RegisterValue::String(serial));
        self.define(device, FeatureDescriptor::new("DeviceUserID", "Device User ID", Text), ReadWrite, RegisterValue::String(String::new()));

        // Géométrie
        let image = "ImageFormatControl";
        self.define(image, FeatureDescriptor::new("SensorWidth", "Sensor Width", Integer), ReadOnly, width.into());
        self.define(image, FeatureDescriptor::new("SensorHeight", "Sensor Height", Integer), ReadOnly, height.into());
        self.define(image, FeatureDescriptor::new("WidthMax", "Max Width", Integer), ReadOnly, width.into());
        self.define(image, FeatureDescriptor::new("HeightMax", "Max Height", Integer), ReadOnly, height.into());
        self.define(image, FeatureDescriptor::new("Width", "Width", Integer), ReadWrite, width.into());
        self.define(image, FeatureDescriptor::new("Height", "Height", Integer), ReadWrite, height.into());
        self.define(image, FeatureDescriptor::new("OffsetX", "Offset X", Integer), ReadWrite, 0i64.into());
        self.define(image, FeatureDescriptor::new("OffsetY", "Offset Y", Integer), ReadWrite, 0i64.into());
        self.define(image, FeatureDescriptor::new("BinningHorizontal", "Binning Horizontal", Integer), ReadWrite, 1i64.into())
            .bounded(1.0, 4.0, Some(1.0));
        self.define(image, FeatureDescriptor::new("BinningVertical", "Binning Vertical", Integer), ReadWrite, 1i64.into())
            .bounded(1.0, 4.0, Some(1.0));
        self.define(image, FeatureDescriptor::new("PixelFormat", "Pixel Format", Enumeration), ReadWrite, RegisterValue::symbol("Mono8"))
            .entries(&["Mono8", "Mono10", "Mono12", "Mono16"]);

        // Acquisition et déclenchement
        let acquisition = "AcquisitionControl";
        self.define(acquisition, FeatureDescriptor::new("AcquisitionMode", "Acquisition Mode", Enumeration), ReadWrite, RegisterValue::symbol("Continuous"))
            .entries(&["SingleFrame", "MultiFrame", "Continuous"]);
        self.define(acquisition, FeatureDescriptor::new("TriggerSelector", "Trigger Selector", Enumeration), ReadWrite, RegisterValue::symbol("FrameStart"))
            .entries(&["AcquisitionStart", "FrameStart"]);
        self.define(acquisition, FeatureDescriptor::new("TriggerMode", "Trigger Mode", Enumeration), ReadWrite, RegisterValue::symbol("Off"))
            .entries(&["Off", "On"]);
        self.define(acquisition, FeatureDescriptor::new("TriggerSource", "Trigger Source", Enumeration), ReadWrite, RegisterValue::symbol("Line1"))
            .entries(&["Software", "Line1", "Line2", "Line3", "Line4"]);
        self.define(acquisition, FeatureDescriptor::new("TriggerActivation", "Trigger Activation", Enumeration), ReadWrite, RegisterValue::symbol("RisingEdge"))
            .entries(&["RisingEdge", "FallingEdge", "AnyEdge", "LevelHigh", "LevelLow"]);
        self.define(acquisition, FeatureDescriptor::new("ExposureMode", "Exposure Mode", Enumeration), ReadWrite, RegisterValue::symbol("Timed"))
            .entries(&["Timed", "TriggerWidth"]);

        match self.generation {
            TimingGeneration::Usb3Ace => {
                self.define(acquisition, FeatureDescriptor::new("ExposureTime", "Exposure Time", Float).with_unit("us"), ReadWrite, RegisterValue::Float(5000.0))
                    .bounded(10.0, 10_000_000.0, None);
            }
            TimingGeneration::AceGigE => {
                self.define(acquisition, FeatureDescriptor::new("ExposureTimeAbs", "Exposure Time (Abs)", Float).with_unit("us"), ReadWrite, RegisterValue::Float(5000.0))
                    .bounded(35.0, 10_000_000.0, None);
            }
            TimingGeneration::ScoutGigE => {
                self.define(acquisition, FeatureDescriptor::new("ExposureTimeBaseAbs", "Exposure Time Base (Abs)", Float).with_unit("us"), ReadWrite, RegisterValue::Float(20.0))
                    .bounded(1.0, 1_000_000.0, None);
                self.define(acquisition, FeatureDescriptor::new("ExposureTimeRaw", "Exposure Time (Raw)", Integer), ReadWrite, 250i64.into())
                    .bounded(1.0, 1_000_000.0, Some(1.0));
            }
        }

        self.define(acquisition, FeatureDescriptor::new("AcquisitionFrameRateEnable", "Acquisition Frame Rate Enable", Boolean), ReadWrite, false.into());
        let rate = match self.generation {
            TimingGeneration::Usb3Ace => "AcquisitionFrameRate",
            _ => "AcquisitionFrameRateAbs",
        };
        self.define(acquisition, FeatureDescriptor::new(rate, "Acquisition Frame Rate", Float).with_unit("Hz"), ReadWrite, RegisterValue::Float(30.0))
            .bounded(0.01, 1_000_000.0, None);

        // Couche transport (GigE uniquement)
        if self.info.transport.is_network() {
            let transport = "TransportLayerControl";
            self.define(transport, FeatureDescriptor::new("GevSCPSPacketSize", "Packet Size", Integer).with_unit("B"), ReadWrite, 8192i64.into())
                .bounded(220.0, 9000.0, Some(4.0));
            self.define(transport, FeatureDescriptor::new("GevSCPD", "Inter-Packet Delay", Integer).with_unit("ticks"), ReadWrite, 0i64.into())
                .bounded(0.0, 65535.0, Some(1.0));
            self.define(transport, FeatureDescriptor::new("GevSCFTD", "Frame Transmission Delay", Integer).with_unit("ticks"), ReadWrite, 0i64.into())
                .bounded(0.0, 65535.0, Some(1.0));
            self.define(transport, FeatureDescriptor::new("OutputQueueSize", "Output Queue Size", Integer), ReadWrite, 1i64.into())
                .bounded(1.0, 64.0, Some(1.0));
        }

        self.reset_trigger_slots();
        self.refresh_geometry();
    }

    fn reset_trigger_slots(&mut self) {
        let selectors = self
            .registers
            .get("TriggerSelector")
            .map(|r| r.entries.clone())
            .unwrap_or_default();

        self.trigger_slots = selectors
            .into_iter()
            .map(|selector| {
                let slot = TRIGGER_SCOPED
                    .iter()
                    .filter_map(|name| {
                        self.registers
                            .get(*name)
                            .map(|r| (name.to_string(), r.value.clone()))
                    })
                    .collect();
                (selector, slot)
            })
            .collect();
    }

    /// Définit la taille du capteur (plein format)
    pub fn with_sensor(mut self, width: i64, height: i64) -> Self {
        self.sensor = (width, height);
        for (name, value) in [
            ("SensorWidth", width),
            ("SensorHeight", height),
            ("Width", width),
            ("Height", height),
            ("OffsetX", 0),
            ("OffsetY", 0),
        ] {
            self.store(name, value.into());
        }
        self.refresh_geometry();
        self
    }

    /// Définit la profondeur du pool de tampons
    pub fn with_pool_depth(mut self, depth: usize) -> Self {
        self.pool_depth = depth;
        self
    }

    /// Remplace les valeurs disponibles de `TriggerSelector`
    pub fn with_trigger_selectors(mut self, selectors: &[&str]) -> Self {
        let current = if selectors.contains(&"FrameStart") {
            "FrameStart"
        } else {
            selectors.first().copied().unwrap_or("FrameStart")
        };
        if let Some(register) = self.registers.get_mut("TriggerSelector") {
            register.entries(selectors);
            register.value = RegisterValue::symbol(current);
        }
        self.reset_trigger_slots();
        self
    }

    /// Supprime un registre (absent sur ce modèle)
    pub fn without_register(mut self, name: &str) -> Self {
        self.registers.remove(name);
        self.order.retain(|n| n != name);
        self
    }

    /// Modifie le mode d'accès d'un registre
    pub fn with_access(mut self, name: &str, access: AccessMode) -> Self {
        if let Some(register) = self.registers.get_mut(name) {
            register.access = access;
        }
        self
    }

    pub fn with_ip(mut self, ip: Ipv4Addr) -> Self {
        self.info.ip_address = Some(ip);
        self
    }

    pub fn with_user_name(mut self, name: &str) -> Self {
        self.info.user_defined_name = name.to_string();
        self.store("DeviceUserID", RegisterValue::String(name.to_string()));
        self
    }

    /// L'image d'indice `index` (à partir de 0) sera livrée en échec
    pub fn fail_frame(mut self, index: u64, description: &str) -> Self {
        self.failing_frames.insert(index, description.to_string());
        self
    }

    /// La récupération de l'image d'indice `index` dépassera son délai
    ///
    /// L'image est perdue: la récupération suivante livre l'indice suivant.
    pub fn time_out_frame(mut self, index: u64) -> Self {
        self.timeout_frames.insert(index);
        self
    }

    /// La caméra ne sera jamais prête à recevoir un déclenchement
    pub fn with_trigger_never_ready(mut self) -> Self {
        self.trigger_ready = false;
        self
    }

    pub fn generation(&self) -> TimingGeneration {
        self.generation
    }

    /// Journal des écritures réussies, dans l'ordre
    pub fn writes(&self) -> &[(String, RegisterValue)] {
        &self.writes
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Valeurs écrites dans un registre donné
    pub fn writes_to(&self, name: &str) -> Vec<&RegisterValue> {
        self.writes
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    /// Commandes exécutées
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    pub fn stop_grabbing_calls(&self) -> usize {
        self.stop_calls
    }

    pub fn outstanding_buffers(&self) -> usize {
        self.outstanding.len()
    }

    /// Valeur brute d'un registre, sans contrôle d'accès
    pub fn value(&self, name: &str) -> Option<&RegisterValue> {
        self.registers.get(name).map(|r| &r.value)
    }

    /// Valeur d'un registre de déclenchement pour un sélecteur donné
    pub fn trigger_slot(&self, selector: &str, name: &str) -> Option<&RegisterValue> {
        self.trigger_slots.get(selector)?.get(name)
    }

    fn int(&self, name: &str) -> Option<i64> {
        self.registers.get(name)?.value.as_i64()
    }

    fn store(&mut self, name: &str, value: RegisterValue) {
        if let Some(register) = self.registers.get_mut(name) {
            register.value = value;
        }
    }

    fn current_selector(&self) -> String {
        self.registers
            .get("TriggerSelector")
            .and_then(|r| r.value.as_str().map(str::to_string))
            .unwrap_or_else(|| "FrameStart".to_string())
    }

    fn software_armed(&self) -> bool {
        self.trigger_slots.values().any(|slot| {
            slot.get("TriggerMode").and_then(RegisterValue::as_str) == Some("On")
                && slot.get("TriggerSource").and_then(RegisterValue::as_str) == Some("Software")
        })
    }

    /// Recalcule les maxima après un changement de binning et ramène la
    /// zone courante dans les nouvelles bornes
    fn refresh_geometry(&mut self) {
        let bh = self.int("BinningHorizontal").unwrap_or(1).max(1);
        let bv = self.int("BinningVertical").unwrap_or(1).max(1);
        let width_max = self.sensor.0 / bh;
        let height_max = self.sensor.1 / bv;

        self.store("WidthMax", width_max.into());
        self.store("HeightMax", height_max.into());

        for (size, offset, max) in [
            ("Width", "OffsetX", width_max),
            ("Height", "OffsetY", height_max),
        ] {
            let current = self.int(size).unwrap_or(max).clamp(1, max);
            let position = self.int(offset).unwrap_or(0).clamp(0, max - current);
            self.store(size, current.into());
            self.store(offset, position.into());
            if let Some(register) = self.registers.get_mut(size) {
                register.bounded(1.0, max as f64, Some(1.0));
            }
            if let Some(register) = self.registers.get_mut(offset) {
                register.bounded(0.0, (max - 1) as f64, Some(1.0));
            }
        }
    }

    /// Refuse toute écriture qui placerait offset + taille hors du capteur
    fn check_geometry(&self, name: &str, value: &RegisterValue) -> Result<(), CameraError> {
        let (other, max_name) = match name {
            "Width" => ("OffsetX", "WidthMax"),
            "OffsetX" => ("Width", "WidthMax"),
            "Height" => ("OffsetY", "HeightMax"),
            "OffsetY" => ("Height", "HeightMax"),
            _ => return Ok(()),
        };

        let requested = value.as_i64().unwrap_or(0);
        let other_value = self.int(other).unwrap_or(0);
        let max = self.int(max_name).unwrap_or(i64::MAX);
        if requested + other_value > max {
            return Err(CameraError::InvalidValue {
                name: name.to_string(),
                reason: format!(
                    "{} + {} ({}) dépasse {} ({})",
                    requested, other, other_value, max_name, max
                ),
            });
        }
        Ok(())
    }

    fn count_delivered(&mut self) {
        self.delivered += 1;
        if let Some(max) = self.max_frames {
            if self.delivered >= max {
                self.grabbing = false;
            }
        }
    }

    fn render(&self, width: usize, height: usize, format: PixelFormat) -> Vec<u8> {
        let bytes_per_pixel = format.bytes_per_pixel();
        let mut data = vec![0u8; width * height * bytes_per_pixel];
        let shift = self.delivered as usize;

        // Dégradé diagonal qui se décale d'une image à l'autre
        for (index, pixel) in data.chunks_mut(bytes_per_pixel).enumerate() {
            let x = index % width;
            let y = index / width;
            pixel.fill(((x + y + shift) % 256) as u8);
        }
        data
    }
}

impl CameraControl for SimulatedCamera {
    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&mut self) -> Result<(), CameraError> {
        if !self.is_open {
            info!("Ouverture de la caméra simulée {}", self.info.serial_number);
            self.is_open = true;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.is_open {
            info!("Fermeture de la caméra simulée {}", self.info.serial_number);
            self.grabbing = false;
            self.is_open = false;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn access_mode(&self, name: &str) -> AccessMode {
        self.registers
            .get(name)
            .map(|r| r.access)
            .unwrap_or(AccessMode::NotImplemented)
    }

    fn get(&self, name: &str) -> Result<RegisterValue, CameraError> {
        let register = self
            .registers
            .get(name)
            .filter(|r| r.access.is_implemented())
            .ok_or_else(|| CameraError::Unsupported(name.to_string()))?;

        if !register.access.is_readable() {
            return Err(CameraError::AccessDenied(name.to_string()));
        }

        if TRIGGER_SCOPED.contains(&name) {
            let scoped = self
                .trigger_slots
                .get(&self.current_selector())
                .and_then(|slot| slot.get(name));
            if let Some(value) = scoped {
                return Ok(value.clone());
            }
        }

        Ok(register.value.clone())
    }

    fn set(&mut self, name: &str, value: RegisterValue) -> Result<(), CameraError> {
        let register = self
            .registers
            .get(name)
            .filter(|r| r.access.is_implemented())
            .ok_or_else(|| CameraError::Unsupported(name.to_string()))?;

        if !register.access.is_writable() {
            return Err(CameraError::AccessDenied(name.to_string()));
        }
        if self.grabbing && LOCKED_WHILE_GRABBING.contains(&name) {
            return Err(CameraError::AccessDenied(format!(
                "{} verrouillé pendant la saisie",
                name
            )));
        }

        let value = register.coerce(value)?;
        self.check_geometry(name, &value)?;

        if TRIGGER_SCOPED.contains(&name) {
            let selector = self.current_selector();
            self.trigger_slots
                .entry(selector)
                .or_default()
                .insert(name.to_string(), value.clone());
        } else {
            self.store(name, value.clone());
        }

        if name.starts_with("Binning") {
            self.refresh_geometry();
        }

        trace!("Écriture simulée {} = {}", name, value);
        self.writes.push((name.to_string(), value));
        Ok(())
    }

    fn symbolics(&self, name: &str) -> Result<Vec<String>, CameraError> {
        let register = self
            .registers
            .get(name)
            .filter(|r| r.access.is_implemented())
            .ok_or_else(|| CameraError::Unsupported(name.to_string()))?;

        match register.descriptor.kind {
            FeatureKind::Enumeration => Ok(register.entries.clone()),
            _ => Err(CameraError::InvalidValue {
                name: name.to_string(),
                reason: "pas une énumération".to_string(),
            }),
        }
    }

    fn limits(&self, name: &str) -> Result<Limits, CameraError> {
        let register = self
            .registers
            .get(name)
            .filter(|r| r.access.is_implemented())
            .ok_or_else(|| CameraError::Unsupported(name.to_string()))?;

        register.limits.ok_or_else(|| CameraError::InvalidValue {
            name: name.to_string(),
            reason: "registre sans bornes".to_string(),
        })
    }

    fn execute(&mut self, command: &str) -> Result<(), CameraError> {
        if !COMMANDS.contains(&command) {
            return Err(CameraError::Unsupported(command.to_string()));
        }
        if !self.is_open {
            return Err(CameraError::InvalidState("caméra fermée".to_string()));
        }

        if command == "TriggerSoftware" {
            if !self.grabbing {
                return Err(CameraError::InvalidState("saisie non démarrée".to_string()));
            }
            self.pending_triggers += 1;
        }

        trace!("Commande simulée {}", command);
        self.executed.push(command.to_string());
        Ok(())
    }

    fn start_grabbing(&mut self, max_frames: Option<u64>) -> Result<(), CameraError> {
        if !self.is_open {
            return Err(CameraError::InvalidState("caméra fermée".to_string()));
        }
        if self.grabbing {
            return Err(CameraError::InvalidState("saisie déjà en cours".to_string()));
        }

        debug!(
            "Démarrage de la saisie simulée ({:?} images)",
            max_frames
        );
        self.grabbing = true;
        self.max_frames = max_frames;
        self.delivered = 0;
        self.pending_triggers = 0;
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<(), CameraError> {
        debug!("Arrêt de la saisie simulée");
        self.stop_calls += 1;
        self.grabbing = false;
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    fn wait_for_frame_trigger_ready(&mut self, timeout: Duration) -> Result<(), CameraError> {
        if !self.grabbing {
            return Err(CameraError::InvalidState("saisie non démarrée".to_string()));
        }
        if self.trigger_ready {
            Ok(())
        } else {
            Err(CameraError::Timeout(timeout))
        }
    }

    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, CameraError> {
        if !self.grabbing {
            return Err(CameraError::InvalidState("saisie non démarrée".to_string()));
        }

        // Aucun tampon libre: la caméra ne peut rien livrer avant le délai
        if self.outstanding.len() >= self.pool_depth {
            debug!(
                "Pool épuisé ({} tampons non restitués)",
                self.outstanding.len()
            );
            return Err(CameraError::Timeout(timeout));
        }

        if self.software_armed() {
            if self.pending_triggers == 0 {
                return Err(CameraError::Timeout(timeout));
            }
            self.pending_triggers -= 1;
        }

        let index = self.delivered;
        if self.timeout_frames.remove(&index) {
            // Image perdue: elle compte dans la séquence bornée
            self.count_delivered();
            return Err(CameraError::Timeout(timeout));
        }

        let width = self.int("Width").unwrap_or(self.sensor.0).max(0) as u32;
        let height = self.int("Height").unwrap_or(self.sensor.1).max(0) as u32;
        let pixel_format = self
            .registers
            .get("PixelFormat")
            .and_then(|r| r.value.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(PixelFormat::Mono8);

        let error_description = self.failing_frames.get(&index).cloned();
        let data = match error_description {
            Some(_) => Vec::new(),
            None => self.render(width as usize, height as usize, pixel_format),
        };

        let buffer = self.next_buffer;
        self.next_buffer += 1;
        self.outstanding.insert(buffer);
        self.count_delivered();

        Ok(GrabResult {
            buffer: BufferId(buffer),
            succeeded: error_description.is_none(),
            width,
            height,
            pixel_format,
            data,
            frame_number: index,
            error_description,
        })
    }

    fn release_result(&mut self, buffer: BufferId) -> Result<(), CameraError> {
        if self.outstanding.remove(&buffer.0) {
            Ok(())
        } else {
            Err(CameraError::InvalidValue {
                name: "buffer".to_string(),
                reason: format!("tampon {} inconnu ou déjà restitué", buffer.0),
            })
        }
    }

    fn parameter_schema(&self) -> Result<SchemaNode, CameraError> {
        let categories = CATEGORIES
            .iter()
            .map(|(name, title)| {
                let children = self
                    .order
                    .iter()
                    .filter_map(|feature| self.registers.get(feature))
                    .filter(|register| register.category == *name)
                    .map(|register| SchemaNode::Feature(register.descriptor.clone()))
                    .collect();
                SchemaNode::category(name, title, children)
            })
            .collect();

        Ok(SchemaNode::category("Root", "Root", categories))
    }
}

/// Fabrique de caméras simulées
#[derive(Debug, Clone, Default)]
pub struct SimulatorFactory {
    cameras: Vec<SimulatedCamera>,
}

impl SimulatorFactory {
    pub fn new(cameras: Vec<SimulatedCamera>) -> Self {
        Self { cameras }
    }
}

impl DeviceFactory for SimulatorFactory {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(self.cameras.iter().map(|c| c.info.clone()).collect())
    }

    fn create(&self, info: &DeviceInfo) -> Result<BoxedCamera, CameraError> {
        self.cameras
            .iter()
            .find(|c| c.info.full_name == info.full_name)
            .cloned()
            .map(|camera| Box::new(camera) as BoxedCamera)
            .ok_or_else(|| CameraError::NotFound(info.friendly_name.clone()))
    }
}
