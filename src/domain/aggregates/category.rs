//! Category tree and per-category attribute definitions

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::text::{self, NameGender};

text_enum!(CategoryType {
    Container => "container",
    Direct => "direct",
    Auto => "auto",
});

text_enum!(Gender {
    Men => "men",
    Women => "women",
    Unisex => "unisex",
    General => "general",
});

text_enum!(AttributeType {
    Text => "text",
    Number => "number",
    Select => "select",
    Multiselect => "multiselect",
    Boolean => "boolean",
});

impl From<NameGender> for Gender {
    fn from(g: NameGender) -> Self {
        match g {
            NameGender::Men => Gender::Men,
            NameGender::Women => Gender::Women,
            NameGender::Unisex => Gender::Unisex,
            NameGender::General => Gender::General,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub label: String,
    #[sqlx(try_from = "String")]
    pub category_type: CategoryType,
    pub is_visible: bool,
    /// Explicit section; falls back to the gender word in the name.
    pub display_section: Option<String>,
    pub categorization_attribute_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn display_name(&self) -> &str {
        if self.label.trim().is_empty() { &self.name } else { &self.label }
    }

    pub fn gender(&self) -> Gender {
        self.display_section
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| text::gender_from_name(&self.name).into())
    }

    pub fn clean_name(&self) -> String { text::clean_name(&self.name) }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CategoryAttribute {
    pub id: i64,
    pub category_id: i64,
    pub key: String,
    #[sqlx(try_from = "String")]
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    pub required: bool,
    pub display_order: i32,
    pub label_fa: String,
    pub is_displayed_in_product: bool,
    pub display_in_basket: bool,
}

impl CategoryAttribute {
    /// Same definition attached to another category.
    pub fn copy_for(&self, category_id: i64) -> CategoryAttribute {
        CategoryAttribute { id: 0, category_id, ..self.clone() }
    }

    /// Overwrite the definition with the parent's; returns whether anything changed.
    pub fn sync_from(&mut self, parent: &CategoryAttribute) -> bool {
        let before = (self.attr_type, self.required, self.display_order, self.label_fa.clone(),
            self.is_displayed_in_product, self.display_in_basket);
        self.attr_type = parent.attr_type;
        self.required = parent.required;
        self.display_order = parent.display_order;
        self.label_fa = parent.label_fa.clone();
        self.is_displayed_in_product = parent.is_displayed_in_product;
        self.display_in_basket = parent.display_in_basket;
        before != (self.attr_type, self.required, self.display_order, self.label_fa.clone(),
            self.is_displayed_in_product, self.display_in_basket)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AttributeValue {
    pub id: i64,
    pub attribute_id: i64,
    pub value: String,
    pub display_order: i32,
}

/// Key used to group a category's products: the configured key if the
/// category defines it, else its first attribute.
pub fn categorization_key(category: &Category, attributes: &[CategoryAttribute]) -> Option<String> {
    if let Some(key) = category.categorization_attribute_key.as_deref() {
        if attributes.iter().any(|a| a.key == key) {
            return Some(key.to_string());
        }
    }
    attributes
        .iter()
        .min_by_key(|a| (a.display_order, a.id))
        .map(|a| a.key.clone())
}

/// In-memory view of the whole category forest.
#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    nodes: HashMap<i64, Category>,
    children: HashMap<i64, Vec<i64>>,
}

impl CategoryTree {
    pub fn new(categories: Vec<Category>) -> Self {
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for c in &categories {
            if let Some(parent) = c.parent_id {
                children.entry(parent).or_default().push(c.id);
            }
        }
        for ids in children.values_mut() {
            ids.sort_unstable();
        }
        let nodes = categories.into_iter().map(|c| (c.id, c)).collect();
        Self { nodes, children }
    }

    pub fn get(&self, id: i64) -> Option<&Category> { self.nodes.get(&id) }

    pub fn children(&self, id: i64) -> &[i64] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> Vec<&Category> {
        let mut roots: Vec<&Category> = self
            .nodes
            .values()
            .filter(|c| c.parent_id.map_or(true, |p| !self.nodes.contains_key(&p)))
            .collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name));
        roots
    }

    /// All descendants, breadth first, excluding `id` itself.
    pub fn descendants(&self, id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut queue: VecDeque<i64> = self.children(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if out.contains(&next) {
                continue;
            }
            out.push(next);
            queue.extend(self.children(next).iter().copied());
        }
        out
    }

    /// True when `candidate` is `id` or one of its descendants.
    pub fn is_within(&self, id: i64, candidate: i64) -> bool {
        id == candidate || self.descendants(id).contains(&candidate)
    }

    pub fn effective_type(&self, id: i64) -> CategoryType {
        match self.nodes.get(&id).map(|c| c.category_type) {
            Some(CategoryType::Auto) | None => {
                if self.children(id).is_empty() { CategoryType::Direct } else { CategoryType::Container }
            }
            Some(explicit) => explicit,
        }
    }

    /// Category ids whose products belong to `id`.
    pub fn product_scope(&self, id: i64) -> Vec<i64> {
        let mut scope = vec![id];
        if self.effective_type(id) == CategoryType::Container {
            scope.extend(self.descendants(id));
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn category(id: i64, name: &str, parent_id: Option<i64>, category_type: CategoryType) -> Category {
        let now = Utc::now();
        Category {
            id, name: name.into(), parent_id, label: String::new(), category_type, is_visible: true,
            display_section: None, categorization_attribute_key: None, created_at: now, updated_at: now,
        }
    }

    fn attribute(id: i64, key: &str, order: i32) -> CategoryAttribute {
        CategoryAttribute {
            id, category_id: 1, key: key.into(), attr_type: AttributeType::Select, required: false,
            display_order: order, label_fa: key.into(), is_displayed_in_product: true, display_in_basket: false,
        }
    }

    fn tree() -> CategoryTree {
        CategoryTree::new(vec![
            category(1, "پوشاک", None, CategoryType::Auto),
            category(2, "کفش مردانه", Some(1), CategoryType::Auto),
            category(3, "کفش زنانه", Some(1), CategoryType::Auto),
            category(4, "کتانی مردانه", Some(2), CategoryType::Auto),
            category(5, "ساعت", None, CategoryType::Container),
        ])
    }

    #[test]
    fn test_effective_type() {
        let t = tree();
        assert_eq!(t.effective_type(1), CategoryType::Container);
        assert_eq!(t.effective_type(2), CategoryType::Container);
        assert_eq!(t.effective_type(4), CategoryType::Direct);
        assert_eq!(t.effective_type(5), CategoryType::Container);
    }

    #[test]
    fn test_descendants_and_scope() {
        let t = tree();
        assert_eq!(t.descendants(1), vec![2, 3, 4]);
        assert_eq!(t.product_scope(2), vec![2, 4]);
        assert_eq!(t.product_scope(4), vec![4]);
        assert!(t.is_within(1, 4));
        assert!(!t.is_within(3, 4));
        assert_eq!(t.roots().len(), 2);
    }

    #[test]
    fn test_gender_and_names() {
        let mut c = category(2, "کفش مردانه", None, CategoryType::Auto);
        assert_eq!(c.gender(), Gender::Men);
        assert_eq!(c.clean_name(), "کفش");
        c.display_section = Some("unisex".into());
        assert_eq!(c.gender(), Gender::Unisex);
        assert_eq!(c.display_name(), "کفش مردانه");
        c.label = "کفش".into();
        assert_eq!(c.display_name(), "کفش");
    }

    #[test]
    fn test_categorization_key() {
        let mut c = category(1, "ساعت", None, CategoryType::Auto);
        let attrs = vec![attribute(10, "color", 2), attribute(11, "brand", 1)];
        assert_eq!(categorization_key(&c, &attrs).as_deref(), Some("brand"));
        c.categorization_attribute_key = Some("color".into());
        assert_eq!(categorization_key(&c, &attrs).as_deref(), Some("color"));
        c.categorization_attribute_key = Some("movement".into());
        assert_eq!(categorization_key(&c, &attrs).as_deref(), Some("brand"));
        assert_eq!(categorization_key(&c, &[]), None);
    }

    #[test]
    fn test_sync_from_parent() {
        let parent = attribute(1, "size", 3);
        let mut child = parent.copy_for(9);
        assert_eq!(child.id, 0);
        assert!(!child.sync_from(&parent));
        child.label_fa = "old".into();
        assert!(child.sync_from(&parent));
        assert_eq!(child.label_fa, "size");
    }
}
