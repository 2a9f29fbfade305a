//! Arbre des paramètres de la caméra
//!
//! Le pilote fournit un schéma explicite (catégories et descripteurs de
//! fonctionnalités). L'arbre affichable est construit en lisant, pour chaque
//! fonctionnalité, son mode d'accès, sa valeur, ses bornes et ses entrées.

use serde::Serialize;

use crate::{AccessMode, CameraControl, CameraError, RegisterValue};

/// Type d'une fonctionnalité GenICam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeatureKind {
    Integer,
    Float,
    Enumeration,
    Boolean,
    String,
}

/// Description statique d'une fonctionnalité
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    pub name: String,
    pub title: String,
    pub tooltip: Option<String>,
    pub kind: FeatureKind,
    pub unit: Option<String>,
}

impl FeatureDescriptor {
    pub fn new(name: &str, title: &str, kind: FeatureKind) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            tooltip: None,
            kind,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_tooltip(mut self, tooltip: &str) -> Self {
        self.tooltip = Some(tooltip.to_string());
        self
    }

    /// Convertit une valeur textuelle en valeur de registre typée
    ///
    /// Pour les énumérations, la valeur doit faire partie de `entries`.
    pub fn encode(&self, text: &str, entries: &[String]) -> Result<RegisterValue, CameraError> {
        let invalid = |reason: String| CameraError::InvalidValue {
            name: self.name.clone(),
            reason,
        };

        match self.kind {
            FeatureKind::Integer => text
                .trim()
                .parse::<i64>()
                .map(RegisterValue::Integer)
                .map_err(|e| invalid(e.to_string())),
            FeatureKind::Float => text
                .trim()
                .parse::<f64>()
                .map(RegisterValue::Float)
                .map_err(|e| invalid(e.to_string())),
            FeatureKind::String => Ok(RegisterValue::String(text.to_string())),
            FeatureKind::Boolean => Ok(RegisterValue::Boolean(!matches!(
                text.trim(),
                "" | "false" | "False" | "0"
            ))),
            FeatureKind::Enumeration => {
                let text = text.trim();
                if entries.iter().any(|entry| entry == text) {
                    Ok(RegisterValue::symbol(text))
                } else {
                    Err(invalid(format!(
                        "{} n'est pas parmi {}",
                        text,
                        entries.join(", ")
                    )))
                }
            }
        }
    }
}

/// Noeud du schéma fourni par le pilote
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Category {
        name: String,
        title: String,
        children: Vec<SchemaNode>,
    },
    Feature(FeatureDescriptor),
}

impl SchemaNode {
    pub fn category(name: &str, title: &str, children: Vec<SchemaNode>) -> Self {
        SchemaNode::Category {
            name: name.to_string(),
            title: title.to_string(),
            children,
        }
    }

    /// Recherche le descripteur d'une fonctionnalité par nom
    pub fn find(&self, feature: &str) -> Option<&FeatureDescriptor> {
        match self {
            SchemaNode::Feature(descriptor) if descriptor.name == feature => Some(descriptor),
            SchemaNode::Feature(_) => None,
            SchemaNode::Category { children, .. } => {
                children.iter().find_map(|child| child.find(feature))
            }
        }
    }
}

/// Attributs communs à toutes les feuilles de l'arbre
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub name: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub access: AccessMode,
}

impl ParameterInfo {
    pub fn readonly(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }
}

/// Noeud de l'arbre des paramètres
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterNode {
    #[serde(rename = "group")]
    Category {
        name: String,
        title: String,
        children: Vec<ParameterNode>,
    },
    #[serde(rename = "int")]
    Integer {
        #[serde(flatten)]
        info: ParameterInfo,
        value: Option<i64>,
        limits: Option<(i64, i64)>,
        step: Option<i64>,
    },
    Float {
        #[serde(flatten)]
        info: ParameterInfo,
        value: Option<f64>,
        limits: Option<(f64, f64)>,
        step: Option<f64>,
    },
    #[serde(rename = "list")]
    Enumeration {
        #[serde(flatten)]
        info: ParameterInfo,
        value: Option<String>,
        entries: Vec<String>,
    },
    #[serde(rename = "bool")]
    Boolean {
        #[serde(flatten)]
        info: ParameterInfo,
        value: Option<bool>,
    },
    #[serde(rename = "str")]
    String {
        #[serde(flatten)]
        info: ParameterInfo,
        value: Option<String>,
    },
}

/// Ligne d'une vue tabulaire des paramètres
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterRow {
    pub name: String,
    pub value: String,
    pub type_name: &'static str,
    pub access: &'static str,
}

impl ParameterNode {
    pub fn name(&self) -> &str {
        match self {
            ParameterNode::Category { name, .. } => name,
            ParameterNode::Integer { info, .. }
            | ParameterNode::Float { info, .. }
            | ParameterNode::Enumeration { info, .. }
            | ParameterNode::Boolean { info, .. }
            | ParameterNode::String { info, .. } => &info.name,
        }
    }

    pub fn info(&self) -> Option<&ParameterInfo> {
        match self {
            ParameterNode::Category { .. } => None,
            ParameterNode::Integer { info, .. }
            | ParameterNode::Float { info, .. }
            | ParameterNode::Enumeration { info, .. }
            | ParameterNode::Boolean { info, .. }
            | ParameterNode::String { info, .. } => Some(info),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterNode::Category { .. } => "group",
            ParameterNode::Integer { .. } => "int",
            ParameterNode::Float { .. } => "float",
            ParameterNode::Enumeration { .. } => "list",
            ParameterNode::Boolean { .. } => "bool",
            ParameterNode::String { .. } => "str",
        }
    }

    /// Valeur courante sous forme de texte
    pub fn value_text(&self) -> Option<String> {
        match self {
            ParameterNode::Category { .. } => None,
            ParameterNode::Integer { value, .. } => value.map(|v| v.to_string()),
            ParameterNode::Float { value, .. } => value.map(|v| v.to_string()),
            ParameterNode::Enumeration { value, .. } | ParameterNode::String { value, .. } => {
                value.clone()
            }
            ParameterNode::Boolean { value, .. } => value.map(|v| v.to_string()),
        }
    }

    fn range_text(&self) -> Option<String> {
        let (limits, step) = match self {
            ParameterNode::Integer { limits, step, .. } => (
                limits.map(|(m, x)| (m.to_string(), x.to_string())),
                step.map(|s| s.to_string()),
            ),
            ParameterNode::Float { limits, step, .. } => (
                limits.map(|(m, x)| (m.to_string(), x.to_string())),
                step.map(|s| s.to_string()),
            ),
            _ => (None, None),
        };

        limits.map(|(min, max)| match step {
            Some(step) => format!("[{}:{}:{}]", min, max, step),
            None => format!("[{}:{}]", min, max),
        })
    }

    /// Rendu sur une ligne: `Titre: valeur unité (RO|RW) (t) [min:max:pas]`
    ///
    /// Retourne `None` pour une catégorie.
    pub fn display_line(&self) -> Option<String> {
        let info = self.info()?;
        let value = self.value_text().unwrap_or_else(|| "---".to_string());
        let unit = info
            .unit
            .as_deref()
            .filter(|unit| !unit.is_empty())
            .map(|unit| format!(" {}", unit))
            .unwrap_or_default();
        let access = if info.readonly() { "RO" } else { "RW" };
        let kind = &self.type_name()[..1];

        let mut line = format!("{}: {}{} ({}) ({})", info.title, value, unit, access, kind);
        if let Some(range) = self.range_text() {
            line.push(' ');
            line.push_str(&range);
        }
        Some(line)
    }

    /// Aplatit l'arbre en lignes (ordre de parcours en profondeur)
    pub fn rows(&self) -> Vec<ParameterRow> {
        let mut rows = Vec::new();
        self.collect_rows(&mut rows);
        rows
    }

    fn collect_rows(&self, rows: &mut Vec<ParameterRow>) {
        match self {
            ParameterNode::Category { children, .. } => {
                for child in children {
                    child.collect_rows(rows);
                }
            }
            leaf => {
                if let Some(info) = leaf.info() {
                    rows.push(ParameterRow {
                        name: info.name.clone(),
                        value: leaf.value_text().unwrap_or_default(),
                        type_name: leaf.type_name(),
                        access: if info.readonly() { "RO" } else { "RW" },
                    });
                }
            }
        }
    }

    /// Recherche un noeud par nom
    pub fn find(&self, name: &str) -> Option<&ParameterNode> {
        if self.name() == name {
            return Some(self);
        }
        match self {
            ParameterNode::Category { children, .. } => {
                children.iter().find_map(|child| child.find(name))
            }
            _ => None,
        }
    }
}

/// Construit l'arbre des paramètres à partir du schéma du pilote
///
/// Les fonctionnalités non implémentées ou indisponibles sont ignorées, les
/// feuilles rejetées par `filter` aussi, et les catégories devenues vides sont
/// supprimées. Retourne `None` si rien ne subsiste.
pub fn build_parameter_tree<C, F>(
    camera: &C,
    filter: F,
) -> Result<Option<ParameterNode>, CameraError>
where
    C: CameraControl + ?Sized,
    F: Fn(&ParameterNode) -> bool,
{
    let schema = camera.parameter_schema()?;
    Ok(build_node(camera, &schema, &filter))
}

fn build_node<C, F>(camera: &C, schema: &SchemaNode, filter: &F) -> Option<ParameterNode>
where
    C: CameraControl + ?Sized,
    F: Fn(&ParameterNode) -> bool,
{
    match schema {
        SchemaNode::Category {
            name,
            title,
            children,
        } => {
            let children: Vec<ParameterNode> = children
                .iter()
                .filter_map(|child| build_node(camera, child, filter))
                .collect();
            if children.is_empty() {
                return None;
            }
            Some(ParameterNode::Category {
                name: name.clone(),
                title: title.clone(),
                children,
            })
        }
        SchemaNode::Feature(descriptor) => {
            let access = camera.access_mode(&descriptor.name);
            if !access.is_implemented() {
                return None;
            }
            let node = build_leaf(camera, descriptor, access);
            filter(&node).then_some(node)
        }
    }
}

fn build_leaf<C: CameraControl + ?Sized>(
    camera: &C,
    descriptor: &FeatureDescriptor,
    access: AccessMode,
) -> ParameterNode {
    let info = ParameterInfo {
        name: descriptor.name.clone(),
        title: descriptor.title.clone(),
        tip: descriptor.tooltip.clone(),
        unit: descriptor.unit.clone(),
        access,
    };

    // Une valeur illisible (registre en écriture seule, erreur de lecture)
    // est simplement absente de l'arbre
    let value = if access.is_readable() {
        camera.get(&descriptor.name).ok()
    } else {
        None
    };
    let limits = camera.limits(&descriptor.name).ok();

    match descriptor.kind {
        FeatureKind::Integer => ParameterNode::Integer {
            info,
            value: value.as_ref().and_then(RegisterValue::as_i64),
            limits: limits.map(|l| (l.min as i64, l.max as i64)),
            step: limits.and_then(|l| l.inc).map(|inc| inc as i64),
        },
        FeatureKind::Float => ParameterNode::Float {
            info,
            value: value.as_ref().and_then(RegisterValue::as_f64),
            limits: limits.map(|l| (l.min, l.max)),
            step: limits.and_then(|l| l.inc),
        },
        FeatureKind::Enumeration => ParameterNode::Enumeration {
            info,
            value: value.as_ref().and_then(|v| v.as_str().map(str::to_string)),
            entries: camera.symbolics(&descriptor.name).unwrap_or_default(),
        },
        FeatureKind::Boolean => ParameterNode::Boolean {
            info,
            value: value.as_ref().and_then(RegisterValue::as_bool),
        },
        FeatureKind::String => ParameterNode::String {
            info,
            value: value.as_ref().and_then(|v| v.as_str().map(str::to_string)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedCamera;

    fn leaf(name: &str, access: AccessMode) -> ParameterInfo {
        ParameterInfo {
            name: name.to_string(),
            title: name.to_string(),
            tip: None,
            unit: None,
            access,
        }
    }

    #[test]
    fn test_display_line_with_range() {
        let node = ParameterNode::Float {
            info: ParameterInfo {
                unit: Some("us".to_string()),
                title: "Exposure Time".to_string(),
                ..leaf("ExposureTimeAbs", AccessMode::ReadWrite)
            },
            value: Some(100.0),
            limits: Some((10.0, 1000.0)),
            step: None,
        };

        assert_eq!(
            node.display_line().unwrap(),
            "Exposure Time: 100 us (RW) (f) [10:1000]"
        );
    }

    #[test]
    fn test_display_line_without_value() {
        let node = ParameterNode::Integer {
            info: leaf("Width", AccessMode::ReadOnly),
            value: None,
            limits: Some((1, 1920)),
            step: Some(1),
        };

        assert_eq!(node.display_line().unwrap(), "Width: --- (RO) (i) [1:1920:1]");
    }

    #[test]
    fn test_encode_values() {
        let bool_feature = FeatureDescriptor::new("ReverseX", "Reverse X", FeatureKind::Boolean);
        assert_eq!(bool_feature.encode("False", &[]).unwrap(), RegisterValue::Boolean(false));
        assert_eq!(bool_feature.encode("0", &[]).unwrap(), RegisterValue::Boolean(false));
        assert_eq!(bool_feature.encode("yes", &[]).unwrap(), RegisterValue::Boolean(true));

        let int_feature = FeatureDescriptor::new("Width", "Width", FeatureKind::Integer);
        assert_eq!(int_feature.encode(" 640", &[]).unwrap(), RegisterValue::Integer(640));
        assert!(int_feature.encode("6.4", &[]).is_err());

        let enum_feature = FeatureDescriptor::new("TriggerMode", "Trigger Mode", FeatureKind::Enumeration);
        let entries = vec!["Off".to_string(), "On".to_string()];
        assert_eq!(enum_feature.encode("On", &entries).unwrap(), RegisterValue::symbol("On"));
        assert!(enum_feature.encode("Maybe", &entries).is_err());
    }

    #[test]
    fn test_tree_from_simulator() {
        let camera = SimulatedCamera::gige("sim-0");
        let tree = build_parameter_tree(&camera, |_| true).unwrap().unwrap();

        let width = tree.find("Width").unwrap();
        assert_eq!(width.value_text().as_deref(), Some("1920"));
        assert!(!width.info().unwrap().readonly());

        let selectors = tree.find("TriggerSelector").unwrap();
        match selectors {
            ParameterNode::Enumeration { entries, .. } => {
                assert!(entries.contains(&"FrameStart".to_string()))
            }
            other => panic!("type inattendu: {:?}", other),
        }

        // Les registres absents sur cette génération n'apparaissent pas
        assert!(tree.find("ExposureTimeRaw").is_none());
    }

    #[test]
    fn test_tree_filter_prunes_empty_categories() {
        let camera = SimulatedCamera::gige("sim-0");
        let tree = build_parameter_tree(&camera, |node| node.name().starts_with("Gev"))
            .unwrap()
            .unwrap();

        let rows = tree.rows();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|row| row.name.starts_with("Gev")));

        match &tree {
            ParameterNode::Category { children, .. } => assert_eq!(children.len(), 1),
            other => panic!("type inattendu: {:?}", other),
        }

        let nothing = build_parameter_tree(&camera, |_| false).unwrap();
        assert!(nothing.is_none());
    }

    #[test]
    fn test_tree_serializes_with_type_tags() {
        let camera = SimulatedCamera::gige("sim-0");
        let tree = build_parameter_tree(&camera, |node| node.name() == "Width")
            .unwrap()
            .unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["type"], "group");
        let width = &json["children"][0]["children"][0];
        assert_eq!(width["type"], "int");
        assert_eq!(width["name"], "Width");
        assert_eq!(width["value"], 1920);
    }
}
