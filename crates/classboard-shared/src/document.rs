//! The class-diagram document stored inside every diagram aggregate.
//!
//! A document holds two keyed maps, `elements` and `relations`, both keyed by
//! caller-chosen string ids. The maps are lazily created: a fresh document
//! serializes as `{}` and each map only appears once something writes to it.
//!
//! Mutations operate on `&mut DiagramContent` and either fully apply or leave
//! the document untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

pub type ElementMap = BTreeMap<String, Element>;
pub type RelationMap = BTreeMap<String, Relation>;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A single typed member of a class, e.g. `speed: number`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A diagram node (a class box). Missing fields deserialize to their defaults
/// so records written by partial updates stay readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Element {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Directed edge between two element ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Relation {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
        }
    }

    pub fn touches(&self, element_id: &str) -> bool {
        self.from == element_id || self.to == element_id
    }
}

// ---------------------------------------------------------------------------
// Inputs and patches
// ---------------------------------------------------------------------------

/// Payload for [`DiagramContent::add_class`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewClass {
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub attributes: Option<Vec<Attribute>>,
}

/// Field-level overwrite of an [`Element`]. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub attributes: Option<Vec<Attribute>>,
}

impl ElementPatch {
    pub fn position(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    fn apply(self, element: &mut Element) {
        if let Some(name) = self.name {
            element.name = name;
        }
        if let Some(position) = self.position {
            element.position = position;
        }
        if let Some(attributes) = self.attributes {
            element.attributes = attributes;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
}

impl AttributePatch {
    fn apply(self, attribute: &mut Attribute) {
        if let Some(name) = self.name {
            attribute.name = name;
        }
        if let Some(ty) = self.ty {
            attribute.ty = ty;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationPatch {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl RelationPatch {
    fn apply(self, relation: &mut Relation) {
        if let Some(from) = self.from {
            relation.from = from;
        }
        if let Some(to) = self.to {
            relation.to = to;
        }
        if let Some(kind) = self.kind {
            relation.kind = kind;
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagramContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<ElementMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<RelationMap>,
}

impl DiagramContent {
    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.as_ref()?.get(id)
    }

    pub fn relation(&self, id: &str) -> Option<&Relation> {
        self.relations.as_ref()?.get(id)
    }

    fn elements_mut(&mut self) -> &mut ElementMap {
        self.elements.get_or_insert_with(BTreeMap::new)
    }

    fn relations_mut(&mut self) -> &mut RelationMap {
        self.relations.get_or_insert_with(BTreeMap::new)
    }

    fn class_mut(&mut self, class_id: &str) -> Result<&mut Element, DocumentError> {
        self.elements
            .as_mut()
            .and_then(|elements| elements.get_mut(class_id))
            .ok_or_else(|| DocumentError::ClassNotFound(class_id.to_string()))
    }

    fn existing_relation_mut(
        &mut self,
        relation_id: &str,
    ) -> Result<&mut Relation, DocumentError> {
        self.relations
            .as_mut()
            .and_then(|relations| relations.get_mut(relation_id))
            .ok_or_else(|| DocumentError::RelationNotFound(relation_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    /// Merge `patch` into the element, creating it from an empty record if it
    /// does not exist yet.
    pub fn update_element(&mut self, element_id: &str, patch: ElementPatch) -> &Element {
        let element = self
            .elements_mut()
            .entry(element_id.to_string())
            .or_default();
        patch.apply(element);
        element
    }

    pub fn move_element(&mut self, element_id: &str, position: Position) -> &Element {
        self.update_element(element_id, ElementPatch::position(position))
    }

    pub fn add_class(
        &mut self,
        class_id: &str,
        class: NewClass,
    ) -> Result<&Element, DocumentError> {
        let elements = self.elements_mut();
        if elements.contains_key(class_id) {
            return Err(DocumentError::ClassExists(class_id.to_string()));
        }
        let element = Element {
            name: class.name,
            position: class.position,
            attributes: class.attributes.unwrap_or_default(),
        };
        Ok(elements.entry(class_id.to_string()).or_insert(element))
    }

    /// Remove a class and every relation that starts or ends at it. Returns
    /// the removed element and the ids of the cascaded relations.
    pub fn remove_class(
        &mut self,
        class_id: &str,
    ) -> Result<(Element, Vec<String>), DocumentError> {
        let removed = self
            .elements
            .as_mut()
            .and_then(|elements| elements.remove(class_id))
            .ok_or_else(|| DocumentError::ClassNotFound(class_id.to_string()))?;

        let mut cascaded = Vec::new();
        if let Some(relations) = self.relations.as_mut() {
            relations.retain(|relation_id, relation| {
                if relation.touches(class_id) {
                    cascaded.push(relation_id.clone());
                    false
                } else {
                    true
                }
            });
        }
        Ok((removed, cascaded))
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn add_attribute(
        &mut self,
        class_id: &str,
        attribute: Attribute,
    ) -> Result<&Element, DocumentError> {
        let class = self.class_mut(class_id)?;
        class.attributes.push(attribute);
        Ok(class)
    }

    pub fn update_attribute(
        &mut self,
        class_id: &str,
        index: usize,
        patch: AttributePatch,
    ) -> Result<&Attribute, DocumentError> {
        let class = self.class_mut(class_id)?;
        let len = class.attributes.len();
        let attribute = class
            .attributes
            .get_mut(index)
            .ok_or_else(|| DocumentError::AttributeNotFound {
                class_id: class_id.to_string(),
                index,
                len,
            })?;
        patch.apply(attribute);
        Ok(attribute)
    }

    /// Remove the attribute at `index`; later attributes shift down by one.
    pub fn remove_attribute(
        &mut self,
        class_id: &str,
        index: usize,
    ) -> Result<Attribute, DocumentError> {
        let class = self.class_mut(class_id)?;
        let len = class.attributes.len();
        if index >= len {
            return Err(DocumentError::AttributeNotFound {
                class_id: class_id.to_string(),
                index,
                len,
            });
        }
        Ok(class.attributes.remove(index))
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    /// Insert a relation. Endpoints are not checked against `elements`.
    pub fn add_relation(
        &mut self,
        relation_id: &str,
        relation: Relation,
    ) -> Result<&Relation, DocumentError> {
        let relations = self.relations_mut();
        if relations.contains_key(relation_id) {
            return Err(DocumentError::RelationExists(relation_id.to_string()));
        }
        Ok(relations.entry(relation_id.to_string()).or_insert(relation))
    }

    pub fn update_relation(
        &mut self,
        relation_id: &str,
        patch: RelationPatch,
    ) -> Result<&Relation, DocumentError> {
        let relation = self.existing_relation_mut(relation_id)?;
        patch.apply(relation);
        Ok(relation)
    }

    pub fn remove_relation(&mut self, relation_id: &str) -> Result<Relation, DocumentError> {
        self.relations
            .as_mut()
            .and_then(|relations| relations.remove(relation_id))
            .ok_or_else(|| DocumentError::RelationNotFound(relation_id.to_string()))
    }

    /// Relation ids whose `from` or `to` names an element that does not exist.
    pub fn dangling_relations(&self) -> Vec<&str> {
        let Some(relations) = self.relations.as_ref() else {
            return Vec::new();
        };
        relations
            .iter()
            .filter(|(_, r)| self.element(&r.from).is_none() || self.element(&r.to).is_none())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car() -> NewClass {
        NewClass {
            name: "Car".into(),
            position: Position::new(0.0, 0.0),
            attributes: None,
        }
    }

    fn with_classes(ids: &[&str]) -> DiagramContent {
        let mut doc = DiagramContent::default();
        for id in ids {
            doc.add_class(
                id,
                NewClass {
                    name: id.to_uppercase(),
                    ..NewClass::default()
                },
            )
            .unwrap();
        }
        doc
    }

    #[test]
    fn fresh_document_serializes_without_maps() {
        let doc = DiagramContent::default();
        assert_eq!(serde_json::to_value(&doc).unwrap(), serde_json::json!({}));

        let parsed: DiagramContent = serde_json::from_str("{}").unwrap();
        assert!(parsed.elements.is_none());
        assert!(parsed.relations.is_none());
    }

    #[test]
    fn add_class_defaults_attributes_and_rejects_duplicates() {
        let mut doc = DiagramContent::default();
        let element = doc.add_class("c1", car()).unwrap();
        assert!(element.attributes.is_empty());

        let err = doc.add_class("c1", car()).unwrap_err();
        assert_eq!(err, DocumentError::ClassExists("c1".into()));
        assert!(err.is_conflict());
    }

    #[test]
    fn add_attribute_appends_in_order() {
        let mut doc = DiagramContent::default();
        doc.add_class("c1", car()).unwrap();
        doc.add_attribute("c1", Attribute::new("speed", "number")).unwrap();

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            json["elements"]["c1"]["attributes"],
            serde_json::json!([{ "name": "speed", "type": "number" }])
        );
    }

    #[test]
    fn add_attribute_on_missing_class_is_not_found() {
        let mut doc = DiagramContent::default();
        let err = doc.add_attribute("ghost", Attribute::new("a", "b")).unwrap_err();
        assert_eq!(err, DocumentError::ClassNotFound("ghost".into()));
        assert!(!err.is_conflict());
        // Lookup failures do not materialize the map.
        assert!(doc.elements.is_none());
    }

    #[test]
    fn update_element_creates_missing_record() {
        let mut doc = DiagramContent::default();
        let element = doc.update_element(
            "n1",
            ElementPatch {
                name: Some("Node".into()),
                ..ElementPatch::default()
            },
        );
        assert_eq!(element.name, "Node");
        assert_eq!(element.position, Position::default());
    }

    #[test]
    fn move_element_only_touches_position() {
        let mut doc = DiagramContent::default();
        doc.add_class("c1", car()).unwrap();
        doc.add_attribute("c1", Attribute::new("speed", "number")).unwrap();

        doc.move_element("c1", Position::new(5.0, 5.0));

        let element = doc.element("c1").unwrap();
        assert_eq!(element.position, Position::new(5.0, 5.0));
        assert_eq!(element.name, "Car");
        assert_eq!(element.attributes.len(), 1);
    }

    #[test]
    fn remove_class_cascades_to_touching_relations() {
        let mut doc = with_classes(&["a", "b", "c", "d"]);
        doc.add_relation("r1", Relation::new("a", "b", "association")).unwrap();
        doc.add_relation("r2", Relation::new("c", "a", "inheritance")).unwrap();
        doc.add_relation("r3", Relation::new("b", "d", "composition")).unwrap();

        let (removed, mut cascaded) = doc.remove_class("a").unwrap();
        cascaded.sort();

        assert_eq!(removed.name, "A");
        assert_eq!(cascaded, vec!["r1".to_string(), "r2".to_string()]);
        assert!(doc.element("a").is_none());
        assert!(doc.element("b").is_some());
        assert!(doc.element("c").is_some());
        assert!(doc.relation("r3").is_some());
        assert!(doc.relation("r1").is_none());
        assert!(doc.relation("r2").is_none());
    }

    #[test]
    fn remove_missing_class_is_not_found() {
        let mut doc = with_classes(&["a"]);
        assert_eq!(
            doc.remove_class("b").unwrap_err(),
            DocumentError::ClassNotFound("b".into())
        );
    }

    #[test]
    fn remove_attribute_shifts_indices() {
        let mut doc = DiagramContent::default();
        doc.add_class("c1", car()).unwrap();
        for name in ["a0", "a1", "a2"] {
            doc.add_attribute("c1", Attribute::new(name, "string")).unwrap();
        }

        assert_eq!(doc.remove_attribute("c1", 0).unwrap().name, "a0");
        let names: Vec<_> = doc
            .element("c1")
            .unwrap()
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, ["a1", "a2"]);

        assert_eq!(doc.remove_attribute("c1", 0).unwrap().name, "a1");
        assert!(matches!(
            doc.remove_attribute("c1", 1),
            Err(DocumentError::AttributeNotFound { index: 1, len: 1, .. })
        ));
    }

    #[test]
    fn update_attribute_merges_fields() {
        let mut doc = DiagramContent::default();
        doc.add_class("c1", car()).unwrap();
        doc.add_attribute("c1", Attribute::new("speed", "number")).unwrap();

        let attr = doc
            .update_attribute(
                "c1",
                0,
                AttributePatch {
                    ty: Some("float".into()),
                    ..AttributePatch::default()
                },
            )
            .unwrap();
        assert_eq!(attr, &Attribute::new("speed", "float"));

        assert!(doc.update_attribute("c1", 3, AttributePatch::default()).is_err());
    }

    #[test]
    fn relation_lifecycle() {
        let mut doc = DiagramContent::default();
        // Endpoints are not validated.
        doc.add_relation("r1", Relation::new("x", "y", "association")).unwrap();
        assert!(doc.add_relation("r1", Relation::default()).unwrap_err().is_conflict());

        let updated = doc
            .update_relation(
                "r1",
                RelationPatch {
                    kind: Some("aggregation".into()),
                    ..RelationPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated, &Relation::new("x", "y", "aggregation"));
        assert_eq!(doc.dangling_relations(), vec!["r1"]);

        doc.remove_relation("r1").unwrap();
        assert_eq!(
            doc.remove_relation("r1").unwrap_err(),
            DocumentError::RelationNotFound("r1".into())
        );
        assert!(doc.update_relation("r1", RelationPatch::default()).is_err());
    }

    #[test]
    fn wire_shape_uses_type_key() {
        let json = serde_json::json!({
            "elements": {
                "c1": { "name": "Car", "position": { "x": 1.0, "y": 2.0 },
                        "attributes": [{ "name": "speed", "type": "number" }] }
            },
            "relations": { "r1": { "from": "c1", "to": "c2", "type": "association" } }
        });
        let doc: DiagramContent = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(doc.relation("r1").unwrap().kind, "association");
        assert_eq!(serde_json::to_value(&doc).unwrap(), json);
    }
}
