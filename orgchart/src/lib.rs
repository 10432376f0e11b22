//! Organization chart selection engine.
//! The core indexes an org forest once, keeps the explicit selection sparse, and
//! exposes projectors that turn session state into render-ready views.

pub mod core {
    use serde::{Deserialize, Serialize};
    use serde_with::{DefaultOnNull, serde_as};
    use std::{cmp::Ordering, convert::Infallible, fmt, path::PathBuf, str::FromStr};

    /* ------------------------------- IDs ------------------------------- */

    /// Node and person identifier as it appears in the payload (`number | string`).
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum Identifier {
        Num(i64),
        Text(String),
    }

    impl fmt::Display for Identifier {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Identifier::Num(n) => write!(f, "{n}"),
                Identifier::Text(s) => f.write_str(s),
            }
        }
    }

    impl FromStr for Identifier {
        type Err = Infallible;

        /// Canonical integers become `Num`; anything else (including `007`) stays text.
        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.parse::<i64>() {
                Ok(n) if n.to_string() == s => Ok(Identifier::Num(n)),
                _ => Ok(Identifier::Text(s.to_string())),
            }
        }
    }

    impl From<i64> for Identifier {
        fn from(value: i64) -> Self {
            Identifier::Num(value)
        }
    }

    impl From<i32> for Identifier {
        fn from(value: i32) -> Self {
            Identifier::Num(i64::from(value))
        }
    }

    impl From<&str> for Identifier {
        fn from(value: &str) -> Self {
            Identifier::Text(value.to_string())
        }
    }

    impl From<String> for Identifier {
        fn from(value: String) -> Self {
            Identifier::Text(value)
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// An organization with nested sub-organizations and its own members.
    #[serde_as]
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OrgNode {
        pub id: Identifier,
        pub name: String,
        /// Ordered sub-organizations. `null` or missing decodes as empty.
        #[serde_as(deserialize_as = "DefaultOnNull")]
        #[serde(default)]
        pub children: Vec<OrgNode>,
        /// Members attached directly to this organization.
        #[serde_as(deserialize_as = "DefaultOnNull")]
        #[serde(default)]
        pub people: Vec<Person>,
    }

    impl OrgNode {
        pub fn new(id: impl Into<Identifier>, name: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                children: vec![],
                people: vec![],
            }
        }

        pub fn with_child(mut self, child: OrgNode) -> Self {
            self.children.push(child);
            self
        }

        pub fn with_person(mut self, person: Person) -> Self {
            self.people.push(person);
            self
        }
    }

    /// A member of exactly one organization.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Person {
        pub id: Identifier,
        pub name: String,
        #[serde(default)]
        pub title: Option<String>,
        pub email: String,
        /// Owning organization; must name a node of the same forest.
        pub organization_id: Identifier,
    }

    impl Person {
        pub fn new(
            id: impl Into<Identifier>,
            name: impl Into<String>,
            email: impl Into<String>,
            organization_id: impl Into<Identifier>,
        ) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                title: None,
                email: email.into(),
                organization_id: organization_id.into(),
            }
        }

        pub fn with_title(mut self, title: impl Into<String>) -> Self {
            self.title = Some(title.into());
            self
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Id violations found while indexing; downstream queries assume global uniqueness.
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum MalformedTreeError {
        #[error("duplicate organization id {0}")]
        DuplicateOrganization(Identifier),
        #[error("duplicate person id {0}")]
        DuplicatePerson(Identifier),
        #[error("person {person} references unknown organization {organization}")]
        UnknownOrganization {
            person: Identifier,
            organization: Identifier,
        },
        #[error("person {person} is nested under {nested_under} but belongs to {organization}")]
        OwnerMismatch {
            person: Identifier,
            nested_under: Identifier,
            organization: Identifier,
        },
    }

    /// The tree payload could not be obtained or decoded.
    #[derive(Debug, thiserror::Error)]
    pub enum LoadError {
        #[error("reading {path:?}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("decoding organization tree")]
        Decode(#[from] serde_json::Error),
    }

    #[derive(Debug, thiserror::Error)]
    pub enum ExplorerError {
        #[error("failed to load organization tree")]
        Load(#[from] LoadError),
        #[error("organization tree is malformed")]
        MalformedTree(#[from] MalformedTreeError),
    }

    /* ----------------------- Utility: display ordering ----------------------- */

    /// Ordering used for every user-facing list of names.
    ///
    /// Case-folded comparison first, then the raw text so that the order stays total.
    pub fn compare_display_names(a: &str, b: &str) -> Ordering {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn identifiers_decode_from_numbers_and_strings() {
            let ids: Vec<Identifier> = serde_json::from_str(r#"[1, "dept:42", -3]"#).unwrap();
            assert_eq!(
                ids,
                vec![
                    Identifier::Num(1),
                    Identifier::Text("dept:42".into()),
                    Identifier::Num(-3)
                ]
            );
        }

        #[test]
        fn identifier_from_str_keeps_padded_numbers_as_text() {
            assert_eq!("12".parse::<Identifier>().unwrap(), Identifier::Num(12));
            assert_eq!(
                "007".parse::<Identifier>().unwrap(),
                Identifier::Text("007".into())
            );
            assert_eq!(
                "emp:7".parse::<Identifier>().unwrap(),
                Identifier::Text("emp:7".into())
            );
        }

        #[test]
        fn null_children_and_people_decode_as_empty() {
            let node: OrgNode =
                serde_json::from_str(r#"{"id": 1, "name": "HQ", "children": null}"#).unwrap();
            assert!(node.children.is_empty());
            assert!(node.people.is_empty());
        }

        #[test]
        fn display_names_compare_case_insensitively() {
            let mut names = vec!["bob", "Alice", "alice", "Carol"];
            names.sort_by(|a, b| compare_display_names(a, b));
            assert_eq!(names, vec!["Alice", "alice", "bob", "Carol"]);
        }
    }
}

pub mod index {
    //! One-pass lookup structures over a loaded forest.
    //!
    //! The index is an arena keyed by id plus parent/children adjacency, so every
    //! later query is a map lookup or a walk bounded by the subtree it asks about.

    use super::core::*;
    use indexmap::IndexMap;
    use serde::Serialize;
    use std::collections::{HashMap, VecDeque};

    /// Flattened organization record held by the index.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct OrgEntry {
        pub id: Identifier,
        pub name: String,
        /// Child organization ids in source order.
        pub children: Vec<Identifier>,
        /// Ids of people attached directly to this organization.
        pub people: Vec<Identifier>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct TreeIndex {
        roots: Vec<Identifier>,
        /// Depth-first, parent-before-child insertion order.
        nodes: IndexMap<Identifier, OrgEntry>,
        parents: HashMap<Identifier, Identifier>,
        people: IndexMap<Identifier, Person>,
        /// Lowercased email -> first person carrying it.
        emails: HashMap<String, Identifier>,
    }

    impl TreeIndex {
        /// Index a forest. Any id violation rejects the whole forest.
        pub fn build(forest: &[OrgNode]) -> Result<Self, MalformedTreeError> {
            let mut index = Self::default();
            for root in forest {
                index.roots.push(root.id.clone());
                if let Err(err) = index.insert_tree(root) {
                    tracing::warn!(%err, "rejecting organization tree");
                    return Err(err);
                }
            }

            if let Err(err) = index.check_owners() {
                tracing::warn!(%err, "rejecting organization tree");
                return Err(err);
            }

            tracing::debug!(
                roots = index.roots.len(),
                organizations = index.nodes.len(),
                people = index.people.len(),
                "indexed organization tree"
            );
            Ok(index)
        }

        fn insert_tree(&mut self, root: &OrgNode) -> Result<(), MalformedTreeError> {
            let mut stack: Vec<(&OrgNode, Option<&Identifier>)> = vec![(root, None)];
            while let Some((node, parent)) = stack.pop() {
                if self.nodes.contains_key(&node.id) {
                    return Err(MalformedTreeError::DuplicateOrganization(node.id.clone()));
                }

                let mut people = Vec::with_capacity(node.people.len());
                for person in &node.people {
                    if self.people.contains_key(&person.id) {
                        return Err(MalformedTreeError::DuplicatePerson(person.id.clone()));
                    }
                    self.people.insert(person.id.clone(), person.clone());
                    people.push(person.id.clone());
                    let email = person.email.trim().to_lowercase();
                    if !email.is_empty() {
                        self.emails.entry(email).or_insert_with(|| person.id.clone());
                    }
                }

                self.nodes.insert(
                    node.id.clone(),
                    OrgEntry {
                        id: node.id.clone(),
                        name: node.name.clone(),
                        children: Vec::with_capacity(node.children.len()),
                        people,
                    },
                );

                if let Some(parent_id) = parent {
                    self.parents.insert(node.id.clone(), parent_id.clone());
                    if let Some(parent_entry) = self.nodes.get_mut(parent_id) {
                        parent_entry.children.push(node.id.clone());
                    }
                }

                // Reversed so siblings pop in source order.
                for child in node.children.iter().rev() {
                    stack.push((child, Some(&node.id)));
                }
            }
            Ok(())
        }

        /// Every person must be nested under the organization they name as owner.
        fn check_owners(&self) -> Result<(), MalformedTreeError> {
            for entry in self.nodes.values() {
                for person in entry.people.iter().filter_map(|id| self.people.get(id)) {
                    if person.organization_id == entry.id {
                        continue;
                    }
                    return Err(if self.nodes.contains_key(&person.organization_id) {
                        MalformedTreeError::OwnerMismatch {
                            person: person.id.clone(),
                            nested_under: entry.id.clone(),
                            organization: person.organization_id.clone(),
                        }
                    } else {
                        MalformedTreeError::UnknownOrganization {
                            person: person.id.clone(),
                            organization: person.organization_id.clone(),
                        }
                    });
                }
            }
            Ok(())
        }

        /* ------------------------------ Lookups ------------------------------ */

        pub fn roots(&self) -> &[Identifier] {
            &self.roots
        }

        pub fn node(&self, id: &Identifier) -> Option<&OrgEntry> {
            self.nodes.get(id)
        }

        pub fn person(&self, id: &Identifier) -> Option<&Person> {
            self.people.get(id)
        }

        pub fn contains(&self, id: &Identifier) -> bool {
            self.nodes.contains_key(id)
        }

        pub fn contains_person(&self, id: &Identifier) -> bool {
            self.people.contains_key(id)
        }

        /// Case-insensitive; with duplicate addresses the first person in tree order wins.
        pub fn person_by_email(&self, email: &str) -> Option<&Person> {
            let id = self.emails.get(&email.trim().to_lowercase())?;
            self.people.get(id)
        }

        /// Map a raw token (e.g. from a command line) onto a known organization id.
        ///
        /// A canonical integer is tried as a number first and then as text, since
        /// JSON producers disagree on whether ids are quoted.
        pub fn resolve_org_id(&self, raw: &str) -> Option<&Identifier> {
            id_candidates(raw)
                .into_iter()
                .find_map(|id| self.nodes.get_key_value(&id).map(|(key, _)| key))
        }

        pub fn resolve_person_id(&self, raw: &str) -> Option<&Identifier> {
            id_candidates(raw)
                .into_iter()
                .find_map(|id| self.people.get_key_value(&id).map(|(key, _)| key))
        }

        /// `None` for roots and unknown ids.
        pub fn parent_of(&self, id: &Identifier) -> Option<&Identifier> {
            self.parents.get(id)
        }

        /// Empty for leaves and unknown ids.
        pub fn children_of(&self, id: &Identifier) -> &[Identifier] {
            self.nodes
                .get(id)
                .map(|entry| entry.children.as_slice())
                .unwrap_or(&[])
        }

        /// Strict ancestors, nearest first.
        pub fn ancestors(&self, id: &Identifier) -> Vec<&Identifier> {
            let mut out = Vec::new();
            let mut current = self.parents.get(id);
            while let Some(parent) = current {
                out.push(parent);
                current = self.parents.get(parent);
            }
            out
        }

        /// Organizations in depth-first order.
        pub fn nodes(&self) -> impl Iterator<Item = &OrgEntry> {
            self.nodes.values()
        }

        pub fn people(&self) -> impl Iterator<Item = &Person> {
            self.people.values()
        }

        pub fn len(&self) -> usize {
            self.nodes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.nodes.is_empty()
        }

        pub fn person_count(&self) -> usize {
            self.people.len()
        }

        /* ------------------------------ Subtrees ------------------------------ */

        /// `id` followed by every descendant, depth-first.
        /// An unknown id yields just itself.
        pub fn descendant_org_ids(&self, id: &Identifier) -> Vec<Identifier> {
            let mut out = Vec::new();
            let mut stack = vec![id];
            while let Some(current) = stack.pop() {
                out.push(current.clone());
                for child in self.children_of(current).iter().rev() {
                    stack.push(child);
                }
            }
            out
        }

        /// People of `id` and of every descendant organization, depth-first.
        pub fn effective_people_for(&self, id: &Identifier) -> Vec<&Person> {
            if !self.contains(id) {
                return vec![];
            }
            self.descendant_org_ids(id)
                .iter()
                .filter_map(|org| self.nodes.get(org))
                .flat_map(|entry| entry.people.iter())
                .filter_map(|person| self.people.get(person))
                .collect()
        }

        /// Breadth-first search over strict descendants, so direct children are tested first.
        pub fn any_strict_descendant(
            &self,
            id: &Identifier,
            mut pred: impl FnMut(&Identifier) -> bool,
        ) -> bool {
            let mut queue: VecDeque<&Identifier> = self.children_of(id).iter().collect();
            while let Some(current) = queue.pop_front() {
                if pred(current) {
                    return true;
                }
                queue.extend(self.children_of(current));
            }
            false
        }
    }

    fn id_candidates(raw: &str) -> Vec<Identifier> {
        let raw = raw.trim();
        match raw.parse::<Identifier>() {
            Ok(num @ Identifier::Num(_)) => vec![num, Identifier::Text(raw.to_string())],
            _ => vec![Identifier::Text(raw.to_string())],
        }
    }

}

pub mod selection {
    //! Explicit selection sets and the queries derived from them.
    //!
    //! Selecting an organization stores its whole closure (the org and every
    //! descendant org), so `Checked` is plain set membership.

    use super::core::*;
    use super::index::{OrgEntry, TreeIndex};
    use indexmap::{IndexMap, IndexSet};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SelectionMark {
        Checked,
        Unchecked,
        Indeterminate,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SelectionState {
        #[serde(default)]
        selected_org_ids: IndexSet<Identifier>,
        #[serde(default)]
        selected_person_ids: IndexSet<Identifier>,
    }

    /// A person in the summary together with how they got there.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct SelectedPerson<'a> {
        pub person: &'a Person,
        /// Included because an enclosing organization is selected.
        pub via_org: bool,
        /// Picked individually.
        pub manual: bool,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct SelectionSummary<'a> {
        /// Minimal covering set: selected orgs whose parent is not selected.
        pub orgs: Vec<&'a OrgEntry>,
        pub people: Vec<SelectedPerson<'a>>,
    }

    /// What the mail-integration side receives for each selected person.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Recipient {
        pub id: Identifier,
        pub name: String,
        pub email: String,
    }

    impl SelectionSummary<'_> {
        pub fn is_empty(&self) -> bool {
            self.orgs.is_empty() && self.people.is_empty()
        }

        pub fn recipients(&self) -> Vec<Recipient> {
            self.people
                .iter()
                .map(|selected| Recipient {
                    id: selected.person.id.clone(),
                    name: selected.person.name.clone(),
                    email: selected.person.email.clone(),
                })
                .collect()
        }
    }

    impl SelectionState {
        pub fn new() -> Self {
            Self::default()
        }

        /* ------------------------------ Commands ------------------------------ */

        /// Select or deselect `org_id` together with all of its descendants.
        pub fn set_org_selected(&mut self, index: &TreeIndex, org_id: &Identifier, selected: bool) {
            if !index.contains(org_id) {
                tracing::debug!(%org_id, "ignoring selection change for unknown organization");
                return;
            }
            let closure = index.descendant_org_ids(org_id);
            tracing::debug!(%org_id, selected, affected = closure.len(), "organization selection");
            if selected {
                self.selected_org_ids.extend(closure);
            } else {
                for id in &closure {
                    self.selected_org_ids.shift_remove(id);
                }
            }
        }

        /// Plain membership toggle; never cascades.
        pub fn set_person_selected(
            &mut self,
            index: &TreeIndex,
            person_id: &Identifier,
            selected: bool,
        ) {
            if !index.contains_person(person_id) {
                tracing::debug!(%person_id, "ignoring selection change for unknown person");
                return;
            }
            if selected {
                self.selected_person_ids.insert(person_id.clone());
            } else {
                self.selected_person_ids.shift_remove(person_id);
            }
        }

        pub fn clear(&mut self) {
            self.selected_org_ids.clear();
            self.selected_person_ids.clear();
        }

        /* ------------------------------- Queries ------------------------------- */

        pub fn is_org_selected(&self, org_id: &Identifier) -> bool {
            self.selected_org_ids.contains(org_id)
        }

        pub fn is_person_selected(&self, person_id: &Identifier) -> bool {
            self.selected_person_ids.contains(person_id)
        }

        pub fn selected_org_ids(&self) -> impl Iterator<Item = &Identifier> {
            self.selected_org_ids.iter()
        }

        pub fn selected_person_ids(&self) -> impl Iterator<Item = &Identifier> {
            self.selected_person_ids.iter()
        }

        pub fn is_empty(&self) -> bool {
            self.selected_org_ids.is_empty() && self.selected_person_ids.is_empty()
        }

        /// `Checked` if selected, `Indeterminate` if any strict descendant is, else `Unchecked`.
        pub fn org_selection_state(&self, index: &TreeIndex, org_id: &Identifier) -> SelectionMark {
            if self.selected_org_ids.contains(org_id) {
                SelectionMark::Checked
            } else if index.any_strict_descendant(org_id, |id| self.selected_org_ids.contains(id)) {
                SelectionMark::Indeterminate
            } else {
                SelectionMark::Unchecked
            }
        }

        pub fn selection_summary<'a>(&self, index: &'a TreeIndex) -> SelectionSummary<'a> {
            let mut orgs: Vec<&OrgEntry> = self
                .selected_org_ids
                .iter()
                .filter(|id| {
                    index
                        .parent_of(id)
                        .is_none_or(|parent| !self.selected_org_ids.contains(parent))
                })
                .filter_map(|id| index.node(id))
                .collect();
            orgs.sort_by(|a, b| compare_display_names(&a.name, &b.name).then_with(|| a.id.cmp(&b.id)));

            // Every selected org lies under some covering org, so the covering set's people
            // are the union over all selected orgs.
            let mut people: IndexMap<&Identifier, SelectedPerson<'a>> = IndexMap::new();
            for org in &orgs {
                for person in index.effective_people_for(&org.id) {
                    people
                        .entry(&person.id)
                        .or_insert(SelectedPerson {
                            person,
                            via_org: false,
                            manual: false,
                        })
                        .via_org = true;
                }
            }
            for person_id in &self.selected_person_ids {
                let Some(person) = index.person(person_id) else {
                    continue;
                };
                people
                    .entry(&person.id)
                    .or_insert(SelectedPerson {
                        person,
                        via_org: false,
                        manual: false,
                    })
                    .manual = true;
            }

            let mut people: Vec<SelectedPerson<'a>> = people.into_values().collect();
            people.sort_by(|a, b| {
                compare_display_names(&a.person.name, &b.person.name)
                    .then_with(|| a.person.id.cmp(&b.person.id))
            });

            SelectionSummary { orgs, people }
        }

        pub fn recipients(&self, index: &TreeIndex) -> Vec<Recipient> {
            self.selection_summary(index).recipients()
        }
    }

}

pub mod search {
    //! Name search that keeps the ancestor path of every match.

    use super::core::{Identifier, OrgNode};

    /// A kept node: original data plus the filtered children.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FilteredNode<'a> {
        pub node: &'a OrgNode,
        pub children: Vec<FilteredNode<'a>>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SearchFilter<'a> {
        /// No query; render the raw forest.
        Unfiltered,
        /// Matching nodes and their ancestors. Empty when nothing matched.
        Matches(Vec<FilteredNode<'a>>),
    }

    impl<'a> SearchFilter<'a> {
        /// While a query is active every visible node is shown expanded.
        pub fn is_active(&self) -> bool {
            matches!(self, SearchFilter::Matches(_))
        }

        pub fn matches(&self) -> Option<&[FilteredNode<'a>]> {
            match self {
                SearchFilter::Unfiltered => None,
                SearchFilter::Matches(nodes) => Some(nodes.as_slice()),
            }
        }
    }

    /// Case-insensitive substring filter on organization names.
    pub fn filter<'a>(forest: &'a [OrgNode], query: &str) -> SearchFilter<'a> {
        let query = query.trim();
        if query.is_empty() {
            return SearchFilter::Unfiltered;
        }
        let needle = query.to_lowercase();
        SearchFilter::Matches(filter_nodes(forest, &needle))
    }

    fn filter_nodes<'a>(nodes: &'a [OrgNode], needle: &str) -> Vec<FilteredNode<'a>> {
        let mut out = Vec::new();
        for node in nodes {
            let children = filter_nodes(&node.children, needle);
            if !children.is_empty() || node.name.to_lowercase().contains(needle) {
                out.push(FilteredNode { node, children });
            }
        }
        out
    }

    /// The node with `id` together with everything nested under it, depth-first.
    pub fn find_subtree<'a>(forest: &'a [OrgNode], id: &Identifier) -> Option<&'a OrgNode> {
        let mut stack: Vec<&OrgNode> = forest.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if &node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::test_support::sample_forest;

        fn names<'a>(nodes: &'a [FilteredNode<'a>]) -> Vec<&'a str> {
            nodes.iter().map(|n| n.node.name.as_str()).collect()
        }

        #[test]
        fn empty_query_means_no_filter() {
            let forest = sample_forest();
            assert_eq!(filter(&forest, ""), SearchFilter::Unfiltered);
            assert_eq!(filter(&forest, "   "), SearchFilter::Unfiltered);
            assert!(!filter(&forest, "").is_active());
        }

        #[test]
        fn no_match_yields_empty_sequence() {
            let forest = sample_forest();
            assert_eq!(filter(&forest, "marketing"), SearchFilter::Matches(vec![]));
        }

        #[test]
        fn matches_keep_ancestor_path_and_prune_siblings() {
            let forest = sample_forest();
            let result = filter(&forest, "PLAT");
            let roots = result.matches().expect("active filter");
            assert_eq!(names(roots), vec!["HQ"]);
            assert_eq!(names(&roots[0].children), vec!["Engineering"]);
            assert_eq!(names(&roots[0].children[0].children), vec!["Platform"]);
            // Original data is referenced, not copied.
            assert!(std::ptr::eq(roots[0].node, &forest[0]));
        }

        #[test]
        fn matching_parent_only_keeps_matching_children() {
            let forest = sample_forest();
            let result = filter(&forest, "hq");
            let roots = result.matches().expect("active filter");
            assert_eq!(names(roots), vec!["HQ"]);
            assert!(roots[0].children.is_empty());
        }

        #[test]
        fn subtree_is_found_at_any_depth() {
            let forest = sample_forest();
            let eng = find_subtree(&forest, &Identifier::Num(2)).expect("engineering");
            assert_eq!(eng.name, "Engineering");
            assert_eq!(eng.children[0].name, "Platform");
            assert!(std::ptr::eq(eng, &forest[0].children[0]));

            let labs = find_subtree(&forest, &Identifier::Num(5)).expect("labs");
            assert_eq!(labs.people[0].name, "Dave");
            assert!(find_subtree(&forest, &Identifier::Num(404)).is_none());
        }
    }
}

pub mod expansion {
    //! UI-only state: which organizations are expanded and which one is shown.

    use super::core::Identifier;
    use super::index::TreeIndex;
    use indexmap::IndexSet;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ExpansionState {
        #[serde(default)]
        expanded_org_ids: IndexSet<Identifier>,
        current_org_id: Option<Identifier>,
    }

    impl ExpansionState {
        pub fn is_expanded(&self, org_id: &Identifier) -> bool {
            self.expanded_org_ids.contains(org_id)
        }

        pub fn current(&self) -> Option<&Identifier> {
            self.current_org_id.as_ref()
        }

        pub fn expanded(&self) -> impl Iterator<Item = &Identifier> {
            self.expanded_org_ids.iter()
        }

        pub fn toggle_expand(&mut self, index: &TreeIndex, org_id: &Identifier) {
            if !index.contains(org_id) {
                return;
            }
            if !self.expanded_org_ids.shift_remove(org_id) {
                self.expanded_org_ids.insert(org_id.clone());
            }
        }

        /// Expand `org_id` and every ancestor so the node is visible.
        pub fn expand_ancestors(&mut self, index: &TreeIndex, org_id: &Identifier) {
            if !index.contains(org_id) {
                return;
            }
            self.expanded_org_ids.insert(org_id.clone());
            for ancestor in index.ancestors(org_id) {
                self.expanded_org_ids.insert(ancestor.clone());
            }
        }

        pub fn expand_roots(&mut self, index: &TreeIndex) {
            self.expanded_org_ids.extend(index.roots().iter().cloned());
        }

        /// Make `org_id` the current node and reveal it.
        pub fn show_organization(&mut self, index: &TreeIndex, org_id: &Identifier) {
            if !index.contains(org_id) {
                tracing::debug!(%org_id, "ignoring request to show unknown organization");
                return;
            }
            self.current_org_id = Some(org_id.clone());
            self.expand_ancestors(index, org_id);
        }

        pub fn reset(&mut self) {
            self.expanded_org_ids.clear();
            self.current_org_id = None;
        }
    }

}

pub mod projectors {
    pub mod tree_projector {
        use crate::core::Identifier;
        use crate::expansion::ExpansionState;
        use crate::index::TreeIndex;
        use crate::search::{FilteredNode, SearchFilter};
        use crate::selection::{SelectionMark, SelectionState};
        use serde::Serialize;

        /// Everything the tree view depends on.
        #[derive(Debug, Clone, Copy)]
        pub struct TreeProjectionInput<'a> {
            pub index: &'a TreeIndex,
            pub selection: &'a SelectionState,
            pub filter: &'a SearchFilter<'a>,
            pub expansion: &'a ExpansionState,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct ViewNode {
            pub id: Identifier,
            pub name: String,
            pub mark: SelectionMark,
            pub has_children: bool,
            pub expanded: bool,
            pub is_current: bool,
            /// Visible children only; empty while collapsed.
            pub children: Vec<ViewNode>,
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum EmptyState {
            NotLoaded,
            NoMatches,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct TreeView {
            pub nodes: Vec<ViewNode>,
            pub empty: Option<EmptyState>,
        }

        #[derive(Clone, Copy)]
        enum Cursor<'a> {
            Indexed(&'a Identifier),
            Filtered(&'a FilteredNode<'a>),
        }

        impl<'a> Cursor<'a> {
            fn id(self) -> &'a Identifier {
                match self {
                    Cursor::Indexed(id) => id,
                    Cursor::Filtered(node) => &node.node.id,
                }
            }

            fn children(self, index: &'a TreeIndex) -> Vec<Cursor<'a>> {
                match self {
                    Cursor::Indexed(id) => index.children_of(id).iter().map(Cursor::Indexed).collect(),
                    Cursor::Filtered(node) => node.children.iter().map(Cursor::Filtered).collect(),
                }
            }
        }

        /// Project the visible tree.
        pub fn project<'a>(input: &TreeProjectionInput<'a>) -> TreeView {
            let force_expand = input.filter.is_active();
            let roots: Vec<Cursor<'a>> = match input.filter {
                SearchFilter::Unfiltered => input.index.roots().iter().map(Cursor::Indexed).collect(),
                SearchFilter::Matches(nodes) => nodes.iter().map(Cursor::Filtered).collect(),
            };

            let nodes: Vec<ViewNode> = roots
                .into_iter()
                .filter_map(|cursor| project_node(input, cursor, force_expand))
                .collect();

            let empty = match (nodes.is_empty(), force_expand) {
                (false, _) => None,
                (true, true) => Some(EmptyState::NoMatches),
                (true, false) => Some(EmptyState::NotLoaded),
            };
            TreeView { nodes, empty }
        }

        fn project_node<'a>(
            input: &TreeProjectionInput<'a>,
            cursor: Cursor<'a>,
            force_expand: bool,
        ) -> Option<ViewNode> {
            let id = cursor.id();
            let entry = input.index.node(id)?;
            let has_children = !entry.children.is_empty();
            let expanded = force_expand || input.expansion.is_expanded(id);

            let children = if has_children && expanded {
                cursor
                    .children(input.index)
                    .into_iter()
                    .filter_map(|child| project_node(input, child, force_expand))
                    .collect()
            } else {
                vec![]
            };

            Some(ViewNode {
                id: id.clone(),
                name: entry.name.clone(),
                mark: input.selection.org_selection_state(input.index, id),
                has_children,
                expanded,
                is_current: input.expansion.current() == Some(id),
                children,
            })
        }

    }

    pub mod details_projector {
        use crate::core::{Identifier, compare_display_names};
        use crate::index::TreeIndex;
        use crate::selection::SelectionState;
        use serde::Serialize;

        /// A member row of the details pane.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct PersonRow {
            pub id: Identifier,
            pub name: String,
            pub title: Option<String>,
            pub email: String,
            /// Selected either through the owning organization or individually.
            pub checked: bool,
            /// The owning organization is selected, so the row cannot be toggled.
            pub locked: bool,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct DetailsView {
            pub id: Identifier,
            pub name: String,
            /// Root → node names.
            pub breadcrumb: Vec<String>,
            /// Descendant organizations, excluding the node itself.
            pub descendant_count: usize,
            /// People in the node and all its descendants.
            pub member_count: usize,
            pub child_names: Vec<String>,
            pub people: Vec<PersonRow>,
        }

        /// Names from the root down to `org_id`, inclusive.
        pub fn breadcrumb(index: &TreeIndex, org_id: &Identifier) -> Vec<String> {
            let mut out = Vec::new();
            let mut current = Some(org_id);
            while let Some(id) = current {
                let Some(entry) = index.node(id) else {
                    break;
                };
                out.push(entry.name.clone());
                current = index.parent_of(id);
            }
            out.reverse();
            out
        }

        pub fn project(
            index: &TreeIndex,
            selection: &SelectionState,
            org_id: &Identifier,
        ) -> Option<DetailsView> {
            let entry = index.node(org_id)?;

            let mut people: Vec<_> = entry
                .people
                .iter()
                .filter_map(|person_id| index.person(person_id))
                .collect();
            people.sort_by(|a, b| compare_display_names(&a.name, &b.name).then_with(|| a.id.cmp(&b.id)));

            let people = people
                .into_iter()
                .map(|person| {
                    let locked = selection.is_org_selected(&person.organization_id);
                    PersonRow {
                        id: person.id.clone(),
                        name: person.name.clone(),
                        title: person.title.clone(),
                        email: person.email.clone(),
                        checked: locked || selection.is_person_selected(&person.id),
                        locked,
                    }
                })
                .collect();

            Some(DetailsView {
                id: entry.id.clone(),
                name: entry.name.clone(),
                breadcrumb: breadcrumb(index, org_id),
                descendant_count: index.descendant_org_ids(org_id).len().saturating_sub(1),
                member_count: index.effective_people_for(org_id).len(),
                child_names: entry
                    .children
                    .iter()
                    .filter_map(|child| index.node(child))
                    .map(|child| child.name.clone())
                    .collect(),
                people,
            })
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::test_support::sample_forest;

            fn id(n: i64) -> Identifier {
                Identifier::Num(n)
            }

            #[test]
            fn breadcrumb_runs_from_root_to_node() {
                let index = TreeIndex::build(&sample_forest()).expect("index");
                assert_eq!(breadcrumb(&index, &id(4)), vec!["HQ", "Engineering", "Platform"]);
                assert_eq!(breadcrumb(&index, &id(5)), vec!["Labs"]);
                assert!(breadcrumb(&index, &id(404)).is_empty());
            }

            #[test]
            fn details_report_counts_and_row_state() {
                let index = TreeIndex::build(&sample_forest()).expect("index");
                let mut selection = SelectionState::default();
                selection.set_person_selected(&index, &id(13), true);

                let details = project(&index, &selection, &id(1)).expect("details");
                assert_eq!(details.descendant_count, 3);
                assert_eq!(details.member_count, 4);
                assert_eq!(details.child_names, vec!["Engineering", "Sales"]);
                assert_eq!(details.people.len(), 1);
                assert!(details.people[0].checked);
                assert!(!details.people[0].locked);

                selection.set_org_selected(&index, &id(2), true);
                let details = project(&index, &selection, &id(2)).expect("details");
                assert!(details.people.iter().all(|row| row.checked && row.locked));
            }

            #[test]
            fn unknown_node_has_no_details() {
                let index = TreeIndex::build(&sample_forest()).expect("index");
                assert!(project(&index, &SelectionState::default(), &id(404)).is_none());
            }
        }
    }
}

pub mod loader {
    //! Boundary adapters that produce a forest. Shape is enforced by serde here so
    //! the core only has to check id uniqueness.

    use super::core::{LoadError, OrgNode};
    use std::{fs, path::PathBuf};

    /// Anything that can hand over a freshly loaded forest.
    pub trait ForestSource {
        fn load_forest(&self) -> Result<Vec<OrgNode>, LoadError>;
    }

    pub fn parse_forest(json: &str) -> Result<Vec<OrgNode>, LoadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON forest from disk.
    #[derive(Debug, Clone)]
    pub struct FileForestSource {
        pub path: PathBuf,
    }

    impl FileForestSource {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    impl ForestSource for FileForestSource {
        fn load_forest(&self) -> Result<Vec<OrgNode>, LoadError> {
            tracing::debug!(path = ?self.path, "loading organization tree");
            let text = fs::read_to_string(&self.path).map_err(|source| LoadError::Io {
                path: self.path.clone(),
                source,
            })?;
            parse_forest(&text)
        }
    }

    /// An already materialized forest.
    #[derive(Debug, Clone, Default)]
    pub struct StaticForestSource(pub Vec<OrgNode>);

    impl ForestSource for StaticForestSource {
        fn load_forest(&self) -> Result<Vec<OrgNode>, LoadError> {
            Ok(self.0.clone())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::Identifier;

        #[test]
        fn file_source_reads_forest() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("tree.json");
            fs::write(
                &path,
                r#"[{"id": "hq", "name": "HQ", "children": [], "people": []}]"#,
            )
            .expect("write tree");

            let forest = FileForestSource::new(&path).load_forest().expect("load");
            assert_eq!(forest.len(), 1);
            assert_eq!(forest[0].id, Identifier::Text("hq".into()));
        }

        #[test]
        fn missing_file_is_io_error() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let err = FileForestSource::new(tmp.path().join("absent.json"))
                .load_forest()
                .unwrap_err();
            assert!(matches!(err, LoadError::Io { .. }));
        }

        #[test]
        fn wrong_shape_is_decode_error() {
            let err = parse_forest(r#"{"id": 1}"#).unwrap_err();
            assert!(matches!(err, LoadError::Decode(_)));
            let err = parse_forest(r#"[{"id": 1, "children": []}]"#).unwrap_err();
            assert!(matches!(err, LoadError::Decode(_)));
        }
    }
}

pub mod directory {
    //! Builds an organization forest out of flat employee records:
    //! company → campus → department → people.

    use super::core::{Identifier, OrgNode, Person};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};

    const UNKNOWN: &str = "Unknown";

    /// An employee row as exported from the HR directory.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Employee {
        pub employee_id: String,
        #[serde(default)]
        pub name: String,
        #[serde(default)]
        pub email: Option<String>,
        #[serde(default)]
        pub campus: Option<String>,
        #[serde(default)]
        pub dept_id: Option<String>,
        #[serde(default)]
        pub dept_name: Option<String>,
        #[serde(default)]
        pub title: Option<String>,
    }

    /// The single root organization of an imported directory.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CompanyInfo {
        pub id: String,
        pub name: String,
    }

    impl Default for CompanyInfo {
        fn default() -> Self {
            Self {
                id: "company".into(),
                name: "Company".into(),
            }
        }
    }

    fn non_empty(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Percent-escape the id separator so that distinct name pairs never join into one id.
    fn id_part(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for ch in raw.chars() {
            match ch {
                '%' => out.push_str("%25"),
                ':' => out.push_str("%3A"),
                _ => out.push(ch),
            }
        }
        out
    }

    /// Group employees into one company tree, preserving first-seen order.
    pub fn build_forest_from_employees(employees: &[Employee], company: &CompanyInfo) -> Vec<OrgNode> {
        let company_id = Identifier::Text(format!("company:{}", id_part(&company.id)));
        // campus key -> (node, dept key -> node)
        let mut campuses: IndexMap<String, (OrgNode, IndexMap<String, OrgNode>)> = IndexMap::new();

        for employee in employees {
            let campus = non_empty(employee.campus.as_deref()).unwrap_or(UNKNOWN);
            let dept_key = non_empty(employee.dept_id.as_deref())
                .or_else(|| non_empty(employee.dept_name.as_deref()))
                .unwrap_or(UNKNOWN);

            let (_, depts) = campuses.entry(campus.to_string()).or_insert_with(|| {
                (
                    OrgNode::new(format!("campus:{}", id_part(campus)), campus),
                    IndexMap::new(),
                )
            });
            let dept = depts.entry(dept_key.to_string()).or_insert_with(|| {
                let label = non_empty(employee.dept_name.as_deref()).unwrap_or(dept_key);
                OrgNode::new(format!("dept:{}:{}", id_part(campus), id_part(dept_key)), label)
            });

            let name = non_empty(Some(employee.name.as_str()))
                .or_else(|| non_empty(employee.email.as_deref()))
                .unwrap_or(employee.employee_id.as_str());
            let mut person = Person::new(
                employee.employee_id.as_str(),
                name,
                employee.email.clone().unwrap_or_default(),
                dept.id.clone(),
            );
            person.title = non_empty(employee.title.as_deref()).map(str::to_string);
            dept.people.push(person);
        }

        let mut root = OrgNode::new(company_id, company.name.clone());
        for (_, (mut campus, depts)) in campuses {
            campus.children = depts.into_values().collect();
            root.children.push(campus);
        }
        tracing::debug!(
            employees = employees.len(),
            campuses = root.children.len(),
            "built organization tree from directory"
        );
        vec![root]
    }

}

pub mod session {
    //! The explorer session: sole owner of all mutable state. Commands mutate it;
    //! callers re-project afterwards.

    use super::core::*;
    use super::expansion::ExpansionState;
    use super::index::TreeIndex;
    use super::loader::ForestSource;
    use super::projectors::details_projector::{self, DetailsView};
    use super::projectors::tree_projector::{self, TreeProjectionInput, TreeView};
    use super::search::{self, SearchFilter};
    use super::selection::{Recipient, SelectionMark, SelectionState, SelectionSummary};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExplorerOptions {
        /// Expand every root right after a successful load.
        pub expand_roots_on_load: bool,
    }

    impl Default for ExplorerOptions {
        fn default() -> Self {
            Self {
                expand_roots_on_load: true,
            }
        }
    }

    #[derive(Debug, Clone, Default)]
    pub struct Explorer {
        options: ExplorerOptions,
        forest: Vec<OrgNode>,
        index: TreeIndex,
        selection: SelectionState,
        expansion: ExpansionState,
        query: String,
    }

    impl Explorer {
        pub fn new(options: ExplorerOptions) -> Self {
            Self {
                options,
                ..Self::default()
            }
        }

        pub fn from_forest(
            forest: Vec<OrgNode>,
            options: ExplorerOptions,
        ) -> Result<Self, MalformedTreeError> {
            let mut explorer = Self::new(options);
            explorer.load_forest(forest)?;
            Ok(explorer)
        }

        /* ------------------------------- Loading ------------------------------- */

        /// Load a new generation. On failure the current state is kept as is.
        pub fn load(&mut self, source: &dyn ForestSource) -> Result<(), ExplorerError> {
            let forest = source.load_forest().inspect_err(|err| {
                tracing::warn!(%err, "organization tree load failed");
            })?;
            self.load_forest(forest)?;
            Ok(())
        }

        pub fn load_forest(&mut self, forest: Vec<OrgNode>) -> Result<(), MalformedTreeError> {
            let index = TreeIndex::build(&forest)?;
            self.forest = forest;
            self.index = index;
            self.selection.clear();
            self.expansion.reset();
            self.query.clear();
            if self.options.expand_roots_on_load {
                self.expansion.expand_roots(&self.index);
            }
            Ok(())
        }

        /* ------------------------------- Commands ------------------------------- */

        pub fn set_org_selected(&mut self, org_id: &Identifier, selected: bool) {
            self.selection.set_org_selected(&self.index, org_id, selected);
        }

        pub fn set_person_selected(&mut self, person_id: &Identifier, selected: bool) {
            self.selection.set_person_selected(&self.index, person_id, selected);
        }

        pub fn clear_selection(&mut self) {
            self.selection.clear();
        }

        pub fn toggle_expand(&mut self, org_id: &Identifier) {
            self.expansion.toggle_expand(&self.index, org_id);
        }

        pub fn expand_ancestors(&mut self, org_id: &Identifier) {
            self.expansion.expand_ancestors(&self.index, org_id);
        }

        pub fn show_organization(&mut self, org_id: &Identifier) {
            self.expansion.show_organization(&self.index, org_id);
        }

        pub fn set_search_query(&mut self, query: &str) {
            self.query = query.trim().to_string();
        }

        /* ------------------------------- Queries ------------------------------- */

        pub fn forest(&self) -> &[OrgNode] {
            &self.forest
        }

        pub fn index(&self) -> &TreeIndex {
            &self.index
        }

        pub fn selection(&self) -> &SelectionState {
            &self.selection
        }

        pub fn expansion(&self) -> &ExpansionState {
            &self.expansion
        }

        pub fn search_query(&self) -> &str {
            &self.query
        }

        pub fn search_filter(&self) -> SearchFilter<'_> {
            search::filter(&self.forest, &self.query)
        }

        pub fn org_selection_state(&self, org_id: &Identifier) -> SelectionMark {
            self.selection.org_selection_state(&self.index, org_id)
        }

        pub fn tree_view(&self) -> TreeView {
            let filter = self.search_filter();
            tree_projector::project(&TreeProjectionInput {
                index: &self.index,
                selection: &self.selection,
                filter: &filter,
                expansion: &self.expansion,
            })
        }

        /// Details of the current node, if one is shown.
        pub fn details(&self) -> Option<DetailsView> {
            let current = self.expansion.current()?;
            details_projector::project(&self.index, &self.selection, current)
        }

        pub fn summary(&self) -> SelectionSummary<'_> {
            self.selection.selection_summary(&self.index)
        }

        pub fn recipients(&self) -> Vec<Recipient> {
            self.summary().recipients()
        }

        /// The loaded node with `id` and everything under it.
        pub fn subtree(&self, org_id: &Identifier) -> Option<&OrgNode> {
            search::find_subtree(&self.forest, org_id)
        }

        pub fn person_by_email(&self, email: &str) -> Option<&Person> {
            self.index.person_by_email(email)
        }

        /// See [`TreeIndex::resolve_org_id`].
        pub fn resolve_org_id(&self, raw: &str) -> Option<Identifier> {
            self.index.resolve_org_id(raw).cloned()
        }

        pub fn resolve_person_id(&self, raw: &str) -> Option<Identifier> {
            self.index.resolve_person_id(raw).cloned()
        }
    }

}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::core::{OrgNode, Person};

    /// HQ(1) { Engineering(2) { Platform(4) }, Sales(3) }, Labs(5).
    pub(crate) fn sample_forest() -> Vec<OrgNode> {
        vec![
            OrgNode::new(1, "HQ")
                .with_person(Person::new(13, "Zed", "zed@example.com", 1).with_title("Director"))
                .with_child(
                    OrgNode::new(2, "Engineering")
                        .with_person(Person::new(10, "Alice", "alice@example.com", 2))
                        .with_child(
                            OrgNode::new(4, "Platform")
                                .with_person(Person::new(12, "Carol", "carol@example.com", 4)),
                        ),
                )
                .with_child(
                    OrgNode::new(3, "Sales").with_person(Person::new(11, "bob", "bob@example.com", 3)),
                ),
            OrgNode::new(5, "Labs").with_person(Person::new(14, "Dave", "dave@example.com", 5)),
        ]
    }
}

pub use index::TreeIndex;
pub use selection::{SelectionMark, SelectionState};
pub use session::{Explorer, ExplorerOptions};
