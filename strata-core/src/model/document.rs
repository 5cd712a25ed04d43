/*!
Media package documents: the element tree stored inside every snapshot.
*/

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::{Result, StrataError};

/// Kind of a media package element
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Track,
    Catalog,
    Attachment,
    Publication,
}

impl ElementKind {
    /// Publications point at distributed copies and are never archived into a tier.
    pub fn is_archived(self) -> bool {
        !matches!(self, ElementKind::Publication)
    }
}

/// What an element reference points at
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ReferenceTarget {
    MediaPackage,
    Element(String),
}

/// Directed edge from an element to its parent element or to the owning media package
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ElementReference {
    pub target: ReferenceTarget,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl ElementReference {
    pub fn to_element<S: Into<String>>(id: S) -> Self {
        Self {
            target: ReferenceTarget::Element(id.into()),
            properties: BTreeMap::new(),
        }
    }

    pub fn to_media_package() -> Self {
        Self {
            target: ReferenceTarget::MediaPackage,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One element of a media package
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
    /// `type/subtype`, e.g. `presenter/source`
    pub flavor: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub uri: String,
    /// Hex SHA-256 of the element content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ElementReference>,
}

impl Element {
    pub fn new<I, F, U>(id: I, kind: ElementKind, flavor: F, uri: U) -> Self
    where
        I: Into<String>,
        F: Into<String>,
        U: Into<String>,
    {
        Self {
            id: id.into(),
            kind,
            flavor: flavor.into(),
            tags: BTreeSet::new(),
            uri: uri.into(),
            checksum: None,
            size: None,
            mime_type: None,
            reference: None,
        }
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_checksum<S: Into<String>>(mut self, checksum: S) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_reference(mut self, reference: ElementReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn has_any_tag(&self, tags: &BTreeSet<String>) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Checks a flavor against a pattern where either half may be `*`
pub fn flavor_matches(pattern: &str, flavor: &str) -> bool {
    let split = |s: &str| -> (String, String) {
        match s.split_once('/') {
            Some((t, st)) => (t.to_string(), st.to_string()),
            None => (s.to_string(), "*".to_string()),
        }
    };
    let (p_type, p_sub) = split(pattern);
    let (f_type, f_sub) = split(flavor);
    (p_type == "*" || p_type == f_type) && (p_sub == "*" || p_sub == f_sub)
}

/// Selects elements by flavor and tag. Empty criteria match everything.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementFilter {
    #[serde(default)]
    pub flavors: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ElementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flavor<S: Into<String>>(mut self, flavor: S) -> Self {
        self.flavors.push(flavor.into());
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn matches(&self, element: &Element) -> bool {
        let flavor_ok = self.flavors.is_empty()
            || self
                .flavors
                .iter()
                .any(|pattern| flavor_matches(pattern, &element.flavor));
        let tag_ok = self.tags.is_empty() || element.has_any_tag(&self.tags);
        flavor_ok && tag_ok
    }
}

/// A composite media object: the document every snapshot preserves
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MediaPackage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl MediaPackage {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            title: None,
            elements: Vec::new(),
        }
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Elements whose content is stored in a tier
    pub fn archived_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| e.kind.is_archived())
    }

    /// True if any element carries one of `tags`
    pub fn has_any_tag(&self, tags: &BTreeSet<String>) -> bool {
        self.elements.iter().any(|e| e.has_any_tag(tags))
    }

    /// Storage id of the serialized manifest: `manifest`, suffixed with `_` until it
    /// collides with no element id
    pub fn manifest_id(&self) -> String {
        let mut id = String::from("manifest");
        while self.element(&id).is_some() {
            id.push('_');
        }
        id
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StrataError::validation("media package id cannot be empty"));
        }
        let mut seen = HashSet::with_capacity(self.elements.len());
        for element in &self.elements {
            if element.id.is_empty() {
                return Err(StrataError::validation(format!(
                    "element without id in media package {}",
                    self.id
                )));
            }
            if !seen.insert(element.id.as_str()) {
                return Err(StrataError::validation(format!(
                    "duplicate element id {} in media package {}",
                    element.id, self.id
                )));
            }
        }
        Ok(())
    }

    /// Remove every element for which `keep` returns false and repair references.
    ///
    /// A reference to a removed element is relinked to the nearest surviving ancestor
    /// on that element's own reference chain. A chain that ends at the media package
    /// relinks to the media package; a chain that ends nowhere (or loops) is cleared.
    /// Returns the number of removed elements.
    pub fn prune<F>(&mut self, keep: F) -> usize
    where
        F: Fn(&Element) -> bool,
    {
        let parents: HashMap<String, Option<ReferenceTarget>> = self
            .elements
            .iter()
            .map(|e| (e.id.clone(), e.reference.as_ref().map(|r| r.target.clone())))
            .collect();
        let removed: HashSet<String> = self
            .elements
            .iter()
            .filter(|e| !keep(e))
            .map(|e| e.id.clone())
            .collect();
        if removed.is_empty() {
            return 0;
        }

        let mut resolver = AncestorResolver {
            parents: &parents,
            removed: &removed,
            resolved: HashMap::new(),
        };

        self.elements.retain(|e| !removed.contains(&e.id));
        for element in &mut self.elements {
            let Some(reference) = element.reference.as_mut() else {
                continue;
            };
            let ReferenceTarget::Element(target_id) = &reference.target else {
                continue;
            };
            if !removed.contains(target_id) {
                continue;
            }
            match resolver.resolve(target_id) {
                Some(target) => reference.target = target,
                None => element.reference = None,
            }
        }
        removed.len()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mp: MediaPackage = serde_json::from_str(json)?;
        mp.validate()?;
        Ok(mp)
    }
}

/// Memoized walk up the parent index. Each element id is resolved at most once.
struct AncestorResolver<'a> {
    parents: &'a HashMap<String, Option<ReferenceTarget>>,
    removed: &'a HashSet<String>,
    resolved: HashMap<String, Option<ReferenceTarget>>,
}

impl AncestorResolver<'_> {
    /// Nearest surviving target for a removed element id
    fn resolve(&mut self, removed_id: &str) -> Option<ReferenceTarget> {
        let mut path: Vec<String> = Vec::new();
        let mut on_path: HashSet<String> = HashSet::new();
        let mut current = removed_id.to_string();

        let answer = loop {
            if let Some(known) = self.resolved.get(&current) {
                break known.clone();
            }
            if !on_path.insert(current.clone()) {
                // reference cycle among removed elements
                break None;
            }
            path.push(current.clone());
            match self.parents.get(&current).cloned().flatten() {
                None => break None,
                Some(ReferenceTarget::MediaPackage) => break Some(ReferenceTarget::MediaPackage),
                Some(ReferenceTarget::Element(parent)) => {
                    if !self.parents.contains_key(&parent) {
                        break None;
                    }
                    if !self.removed.contains(&parent) {
                        break Some(ReferenceTarget::Element(parent));
                    }
                    current = parent;
                }
            }
        };

        for id in path {
            self.resolved.insert(id, answer.clone());
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, flavor: &str) -> Element {
        Element::new(id, ElementKind::Track, flavor, format!("file:///media/{id}.mp4"))
    }

    fn derived(id: &str, flavor: &str, parent: &str) -> Element {
        Element::new(id, ElementKind::Attachment, flavor, format!("file:///media/{id}.png"))
            .with_reference(ElementReference::to_element(parent).with_property("time", "0"))
    }

    #[test]
    fn test_flavor_matching() {
        assert!(flavor_matches("presenter/source", "presenter/source"));
        assert!(flavor_matches("*/source", "presentation/source"));
        assert!(flavor_matches("presenter/*", "presenter/delivery"));
        assert!(!flavor_matches("presenter/source", "presenter/delivery"));
        assert!(flavor_matches("presenter", "presenter/anything"));
    }

    #[test]
    fn test_element_filter() {
        let filter = ElementFilter::new().with_flavor("*/source").with_tag("archive");
        assert!(filter.matches(&track("t1", "presenter/source").with_tag("archive")));
        assert!(!filter.matches(&track("t1", "presenter/source")));
        assert!(!filter.matches(&track("t1", "presenter/work").with_tag("archive")));
        assert!(ElementFilter::new().matches(&track("t1", "x/y")));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mp = MediaPackage::new("mp-1")
            .with_element(track("t1", "presenter/source"))
            .with_element(track("t1", "presenter/work"));
        assert!(matches!(mp.validate(), Err(StrataError::Validation(_))));
        assert!(MediaPackage::new(" ").validate().is_err());
    }

    #[test]
    fn test_prune_relinks_to_nearest_surviving_ancestor() {
        // t1 <- a1 <- a2 <- a3, remove a1 and a2
        let mut mp = MediaPackage::new("mp-1")
            .with_element(track("t1", "presenter/source"))
            .with_element(derived("a1", "presenter/work", "t1"))
            .with_element(derived("a2", "presenter/preview", "a1"))
            .with_element(derived("a3", "presenter/thumb", "a2"));

        let removed = mp.prune(|e| e.id != "a1" && e.id != "a2");

        assert_eq!(removed, 2);
        let a3 = mp.element("a3").unwrap();
        let reference = a3.reference.as_ref().unwrap();
        assert_eq!(reference.target, ReferenceTarget::Element("t1".to_string()));
        assert_eq!(reference.properties.get("time").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_prune_relinks_to_media_package() {
        let mut mp = MediaPackage::new("mp-1")
            .with_element(
                track("t1", "presenter/source").with_reference(ElementReference::to_media_package()),
            )
            .with_element(derived("a1", "presenter/work", "t1"));

        mp.prune(|e| e.id != "t1");

        let a1 = mp.element("a1").unwrap();
        assert_eq!(
            a1.reference.as_ref().unwrap().target,
            ReferenceTarget::MediaPackage
        );
    }

    #[test]
    fn test_prune_clears_reference_without_surviving_ancestor() {
        let mut mp = MediaPackage::new("mp-1")
            .with_element(track("t1", "presenter/source"))
            .with_element(derived("a1", "presenter/work", "t1"));

        mp.prune(|e| e.id != "t1");

        assert!(mp.element("a1").unwrap().reference.is_none());
    }

    #[test]
    fn test_prune_survives_reference_cycles() {
        let mut mp = MediaPackage::new("mp-1")
            .with_element(derived("a1", "x/y", "a2"))
            .with_element(derived("a2", "x/y", "a1"))
            .with_element(derived("a3", "x/y", "a1"));

        mp.prune(|e| e.id == "a3");

        assert_eq!(mp.elements.len(), 1);
        assert!(mp.element("a3").unwrap().reference.is_none());
    }

    #[test]
    fn test_prune_keeps_untouched_references() {
        let mut mp = MediaPackage::new("mp-1")
            .with_element(track("t1", "presenter/source"))
            .with_element(derived("a1", "presenter/work", "t1"))
            .with_element(track("t2", "presenter/delivery"));

        assert_eq!(mp.prune(|e| e.id != "t2"), 1);
        assert_eq!(
            mp.element("a1").unwrap().reference.as_ref().unwrap().target,
            ReferenceTarget::Element("t1".to_string())
        );
    }

    #[test]
    fn test_publications_are_not_archived() {
        let mp = MediaPackage::new("mp-1")
            .with_element(track("t1", "presenter/source"))
            .with_element(Element::new(
                "p1",
                ElementKind::Publication,
                "engage/player",
                "https://example.org/play/mp-1",
            ));
        let archived: Vec<_> = mp.archived_elements().map(|e| e.id.as_str()).collect();
        assert_eq!(archived, vec!["t1"]);
    }

    #[test]
    fn test_json_roundtrip() {
        let mp = MediaPackage::new("mp-1")
            .with_title("Lecture 1")
            .with_element(track("t1", "presenter/source").with_tag("archive"))
            .with_element(derived("a1", "presenter/work", "t1"));
        let json = mp.to_json().unwrap();
        assert_eq!(MediaPackage::from_json(&json).unwrap(), mp);
    }

    #[test]
    fn test_manifest_id_avoids_element_ids() {
        let mp = MediaPackage::new("mp-1").with_element(track("t1", "presenter/source"));
        assert_eq!(mp.manifest_id(), "manifest");

        let mp = mp
            .with_element(track("manifest", "metadata/manifest"))
            .with_element(track("manifest_", "metadata/manifest"));
        assert_eq!(mp.manifest_id(), "manifest__");
    }
}
