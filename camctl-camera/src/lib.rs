//! Interface de contrôle des caméras GigE Vision / USB3 Vision
//!
//! Ce module définit l'interface typée `CameraControl` à travers laquelle le
//! reste du système pilote un pilote de caméra (SDK constructeur ou simulateur):
//! accès aux registres GenICam nommés, démarrage/arrêt de la saisie,
//! récupération bloquante des images et restitution des tampons.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod params;
pub mod simulator;

pub use params::{
    build_parameter_tree, FeatureDescriptor, FeatureKind, ParameterInfo, ParameterNode,
    ParameterRow, SchemaNode,
};
pub use simulator::{SimulatedCamera, SimulatorFactory, TimingGeneration};

/// Erreur liée à la caméra
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Fonctionnalité non supportée par la caméra: {0}")]
    Unsupported(String),

    #[error("Accès refusé au registre: {0}")]
    AccessDenied(String),

    #[error("Valeur invalide pour {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Délai d'attente dépassé ({0:?})")]
    Timeout(Duration),

    #[error("Erreur de périphérique: {0}")]
    Device(String),

    #[error("Caméra non trouvée: {0}")]
    NotFound(String),

    #[error("État invalide: {0}")]
    InvalidState(String),
}

impl CameraError {
    /// Indique si l'erreur signale un registre absent sur cette génération de caméra
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CameraError::Unsupported(_))
    }
}

/// Mode d'accès d'un registre (NI, NA, RO, WO, RW en terminologie GenICam)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    NotImplemented,
    NotAvailable,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }

    pub fn is_implemented(self) -> bool {
        !matches!(self, AccessMode::NotImplemented | AccessMode::NotAvailable)
    }

    /// Abréviation affichée dans les vues de paramètres
    pub fn short(self) -> &'static str {
        match self {
            AccessMode::NotImplemented => "NI",
            AccessMode::NotAvailable => "NA",
            AccessMode::ReadOnly => "RO",
            AccessMode::WriteOnly => "WO",
            AccessMode::ReadWrite => "RW",
        }
    }
}

/// Valeur typée d'un registre de caméra
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Valeur symbolique d'une énumération (ex: "FrameStart")
    Enumeration(String),
    String(String),
}

impl RegisterValue {
    /// Construit une valeur symbolique d'énumération
    pub fn symbol(value: impl Into<String>) -> Self {
        RegisterValue::Enumeration(value.into())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RegisterValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Float(v) => Some(*v),
            RegisterValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RegisterValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegisterValue::Enumeration(v) | RegisterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Integer(v) => write!(f, "{}", v),
            RegisterValue::Float(v) => write!(f, "{}", v),
            RegisterValue::Boolean(v) => write!(f, "{}", v),
            RegisterValue::Enumeration(v) | RegisterValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for RegisterValue {
    fn from(value: i64) -> Self {
        RegisterValue::Integer(value)
    }
}

impl From<f64> for RegisterValue {
    fn from(value: f64) -> Self {
        RegisterValue::Float(value)
    }
}

impl From<bool> for RegisterValue {
    fn from(value: bool) -> Self {
        RegisterValue::Boolean(value)
    }
}

/// Bornes d'un registre numérique
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
    /// Incrément (pas) éventuel
    pub inc: Option<f64>,
}

/// Format d'image supporté
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono10,
    Mono12,
    Mono16,
    RGB8,
    BGR8,
    RGBA8,
    BGRA8,
    YUV422,
    YUV422Packed,
    BayerRG8,
    BayerGB8,
    BayerGR8,
    BayerBG8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 14] = [
        PixelFormat::Mono8,
        PixelFormat::Mono10,
        PixelFormat::Mono12,
        PixelFormat::Mono16,
        PixelFormat::RGB8,
        PixelFormat::BGR8,
        PixelFormat::RGBA8,
        PixelFormat::BGRA8,
        PixelFormat::YUV422,
        PixelFormat::YUV422Packed,
        PixelFormat::BayerRG8,
        PixelFormat::BayerGB8,
        PixelFormat::BayerGR8,
        PixelFormat::BayerBG8,
    ];

    /// Nom symbolique GenICam du format
    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono10 => "Mono10",
            PixelFormat::Mono12 => "Mono12",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::RGB8 => "RGB8",
            PixelFormat::BGR8 => "BGR8",
            PixelFormat::RGBA8 => "RGBA8",
            PixelFormat::BGRA8 => "BGRA8",
            PixelFormat::YUV422 => "YUV422",
            PixelFormat::YUV422Packed => "YUV422Packed",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerBG8 => "BayerBG8",
        }
    }

    /// Taille d'un pixel dans le tampon (formats non compactés)
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRG8
            | PixelFormat::BayerGB8
            | PixelFormat::BayerGR8
            | PixelFormat::BayerBG8 => 1,
            PixelFormat::Mono10
            | PixelFormat::Mono12
            | PixelFormat::Mono16
            | PixelFormat::YUV422
            | PixelFormat::YUV422Packed => 2,
            PixelFormat::RGB8 | PixelFormat::BGR8 => 3,
            PixelFormat::RGBA8 | PixelFormat::BGRA8 => 4,
        }
    }

    /// Profondeur significative par composante
    pub fn bit_depth(self) -> u32 {
        match self {
            PixelFormat::Mono10 => 10,
            PixelFormat::Mono12 => 12,
            PixelFormat::Mono16 => 16,
            _ => 8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .iter()
            .copied()
            .find(|format| format.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CameraError::InvalidValue {
                name: "PixelFormat".to_string(),
                reason: format!("format inconnu: {}", s),
            })
    }
}

/// Couche de transport de la caméra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    GigE,
    Usb3,
    Other,
}

impl Transport {
    /// Vrai pour les transports réseau (réglage du débit des paquets possible)
    pub fn is_network(self) -> bool {
        matches!(self, Transport::GigE)
    }
}

/// Informations d'identification d'une caméra
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub friendly_name: String,
    pub full_name: String,
    pub model_name: String,
    pub vendor_name: String,
    pub serial_number: String,
    pub user_defined_name: String,
    pub device_class: String,
    pub ip_address: Option<Ipv4Addr>,
    pub transport: Transport,
}

impl DeviceInfo {
    /// Liste ordonnée des propriétés (nom, valeur)
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        let mut props = vec![
            ("FriendlyName", self.friendly_name.clone()),
            ("FullName", self.full_name.clone()),
            ("ModelName", self.model_name.clone()),
            ("VendorName", self.vendor_name.clone()),
            ("SerialNumber", self.serial_number.clone()),
            ("UserDefinedName", self.user_defined_name.clone()),
            ("DeviceClass", self.device_class.clone()),
        ];
        if let Some(ip) = self.ip_address {
            props.push(("IpAddress", ip.to_string()));
        }
        props
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.properties() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

/// Critère de sélection d'une caméra parmi celles énumérées
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    /// Adresse IP ou nom d'hôte (résolu avant comparaison)
    Host(String),
    Model(String),
    SerialNumber(String),
    UserName(String),
}

impl DeviceSelector {
    /// Vérifie si la caméra correspond au critère
    pub fn matches(&self, info: &DeviceInfo) -> Result<bool, CameraError> {
        let matched = match self {
            DeviceSelector::Host(host) => Some(resolve_host(host)?) == info.ip_address,
            DeviceSelector::Model(model) => &info.model_name == model,
            DeviceSelector::SerialNumber(serial) => &info.serial_number == serial,
            DeviceSelector::UserName(name) => &info.user_defined_name == name,
        };
        Ok(matched)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Host(host) => write!(f, "hôte {}", host),
            DeviceSelector::Model(model) => write!(f, "modèle {}", model),
            DeviceSelector::SerialNumber(serial) => write!(f, "numéro de série {}", serial),
            DeviceSelector::UserName(name) => write!(f, "nom utilisateur {}", name),
        }
    }
}

/// Résout une adresse IPv4 ou un nom d'hôte
pub fn resolve_host(host: &str) -> Result<Ipv4Addr, CameraError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    let addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|e| CameraError::NotFound(format!("résolution de {} impossible: {}", host, e)))?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| CameraError::NotFound(format!("aucune adresse IPv4 pour {}", host)))
}

/// Identifiant d'un tampon du pool de la caméra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u64);

/// Résultat brut d'une récupération d'image
#[derive(Debug, Clone)]
pub struct GrabResult {
    /// Tampon à restituer via `CameraControl::release_result`
    pub buffer: BufferId,
    pub succeeded: bool,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    /// Numéro de l'image attribué par la caméra
    pub frame_number: u64,
    pub error_description: Option<String>,
}

/// Interface de contrôle d'une caméra
///
/// Seules les opérations utilisées par la configuration et la séquence
/// d'acquisition sont exposées. Les appels de récupération sont bloquants et
/// toujours bornés par un délai explicite.
pub trait CameraControl {
    /// Informations d'identification de la caméra
    fn device_info(&self) -> &DeviceInfo;

    /// Ouvre la session sur la caméra
    fn open(&mut self) -> Result<(), CameraError>;

    /// Ferme la session
    fn close(&mut self) -> Result<(), CameraError>;

    fn is_open(&self) -> bool;

    /// Mode d'accès courant d'un registre
    fn access_mode(&self, name: &str) -> AccessMode;

    /// Lit un registre
    fn get(&self, name: &str) -> Result<RegisterValue, CameraError>;

    /// Écrit un registre
    fn set(&mut self, name: &str, value: RegisterValue) -> Result<(), CameraError>;

    /// Valeurs symboliques disponibles d'une énumération
    fn symbolics(&self, name: &str) -> Result<Vec<String>, CameraError>;

    /// Bornes d'un registre numérique
    fn limits(&self, name: &str) -> Result<Limits, CameraError>;

    /// Exécute une commande (ex: "TriggerSoftware")
    fn execute(&mut self, command: &str) -> Result<(), CameraError>;

    /// Démarre la saisie, limitée à `max_frames` images si précisé
    fn start_grabbing(&mut self, max_frames: Option<u64>) -> Result<(), CameraError>;

    fn stop_grabbing(&mut self) -> Result<(), CameraError>;

    fn is_grabbing(&self) -> bool;

    /// Attend que la caméra accepte un déclenchement d'image
    fn wait_for_frame_trigger_ready(&mut self, timeout: Duration) -> Result<(), CameraError>;

    /// Récupère le prochain résultat (bloquant, borné par `timeout`)
    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, CameraError>;

    /// Restitue un tampon au pool de la caméra
    fn release_result(&mut self, buffer: BufferId) -> Result<(), CameraError>;

    /// Schéma de l'arbre des paramètres exposé par le pilote
    fn parameter_schema(&self) -> Result<SchemaNode, CameraError>;

    fn is_writable(&self, name: &str) -> bool {
        self.access_mode(name).is_writable()
    }

    fn get_i64(&self, name: &str) -> Result<i64, CameraError> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| CameraError::InvalidValue {
            name: name.to_string(),
            reason: format!("entier attendu, obtenu {}", value),
        })
    }

    fn get_f64(&self, name: &str) -> Result<f64, CameraError> {
        let value = self.get(name)?;
        value.as_f64().ok_or_else(|| CameraError::InvalidValue {
            name: name.to_string(),
            reason: format!("réel attendu, obtenu {}", value),
        })
    }
}

impl<T: CameraControl + ?Sized> CameraControl for Box<T> {
    fn device_info(&self) -> &DeviceInfo {
        (**self).device_info()
    }

    fn open(&mut self) -> Result<(), CameraError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), CameraError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn access_mode(&self, name: &str) -> AccessMode {
        (**self).access_mode(name)
    }

    fn get(&self, name: &str) -> Result<RegisterValue, CameraError> {
        (**self).get(name)
    }

    fn set(&mut self, name: &str, value: RegisterValue) -> Result<(), CameraError> {
        (**self).set(name, value)
    }

    fn symbolics(&self, name: &str) -> Result<Vec<String>, CameraError> {
        (**self).symbolics(name)
    }

    fn limits(&self, name: &str) -> Result<Limits, CameraError> {
        (**self).limits(name)
    }

    fn execute(&mut self, command: &str) -> Result<(), CameraError> {
        (**self).execute(command)
    }

    fn start_grabbing(&mut self, max_frames: Option<u64>) -> Result<(), CameraError> {
        (**self).start_grabbing(max_frames)
    }

    fn stop_grabbing(&mut self) -> Result<(), CameraError> {
        (**self).stop_grabbing()
    }

    fn is_grabbing(&self) -> bool {
        (**self).is_grabbing()
    }

    fn wait_for_frame_trigger_ready(&mut self, timeout: Duration) -> Result<(), CameraError> {
        (**self).wait_for_frame_trigger_ready(timeout)
    }

    fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, CameraError> {
        (**self).retrieve_result(timeout)
    }

    fn release_result(&mut self, buffer: BufferId) -> Result<(), CameraError> {
        (**self).release_result(buffer)
    }

    fn parameter_schema(&self) -> Result<SchemaNode, CameraError> {
        (**self).parameter_schema()
    }
}

/// Caméra ouverte par une fabrique
pub type BoxedCamera = Box<dyn CameraControl + Send>;

/// Fabrique de caméras
///
/// Construite explicitement par l'appelant et transmise aux composants qui
/// en ont besoin; sa durée de vie est celle choisie par l'appelant.
pub trait DeviceFactory {
    /// Énumère les caméras accessibles
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError>;

    /// Crée l'instance de contrôle d'une caméra énumérée
    fn create(&self, info: &DeviceInfo) -> Result<BoxedCamera, CameraError>;

    /// Crée la première caméra correspondant au critère
    fn create_first(&self, selector: &DeviceSelector) -> Result<BoxedCamera, CameraError> {
        for info in self.enumerate()? {
            if selector.matches(&info)? {
                info!("Caméra trouvée pour {}: {}", selector, info.friendly_name);
                return self.create(&info);
            }
        }

        debug!("Aucune caméra ne correspond à {}", selector);
        Err(CameraError::NotFound(selector.to_string()))
    }
}
