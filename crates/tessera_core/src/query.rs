//! # Archetype Queries
//!
//! A query selects archetypes by their column set alone: every `include`
//! component present, no `exclude` component present. Row contents never
//! matter.
//!
//! The result is a snapshot of archetype ids. Iterating it twice yields the
//! same ids, and creating entities or archetypes meanwhile cannot invalidate
//! it. Call [`ArchetypeQuery::refresh`] to pick up archetypes created since.

use crate::archetype::{Archetype, ArchetypeId};

/// Include/exclude component filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ComponentFilter {
    /// Creates a filter.
    pub fn new<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Components that must be present.
    #[must_use]
    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// Components that must be absent.
    #[must_use]
    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Every component name the filter mentions.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.include.iter().chain(&self.exclude).map(String::as_str)
    }

    /// Returns `true` if `archetype`'s columns satisfy the filter.
    #[inline]
    #[must_use]
    pub fn matches(&self, archetype: &Archetype) -> bool {
        self.include.iter().all(|c| archetype.has_component(c))
            && !self.exclude.iter().any(|c| archetype.has_component(c))
    }
}

/// Snapshot of the archetypes matching a [`ComponentFilter`].
#[derive(Clone, Debug)]
pub struct ArchetypeQuery {
    filter: ComponentFilter,
    ids: Vec<ArchetypeId>,
    scanned: usize,
}

impl ArchetypeQuery {
    /// Runs `filter` over `archetypes`.
    #[must_use]
    pub fn new(filter: ComponentFilter, archetypes: &[Archetype]) -> Self {
        let mut query = Self {
            filter,
            ids: Vec::new(),
            scanned: 0,
        };
        query.refresh(archetypes);
        query
    }

    /// Adds archetypes created since the last scan. Existing ids are kept.
    pub fn refresh(&mut self, archetypes: &[Archetype]) {
        if let Some(new) = archetypes.get(self.scanned..) {
            self.ids.extend(
                new.iter()
                    .filter(|a| self.filter.matches(a))
                    .map(Archetype::id),
            );
        }
        self.scanned = archetypes.len();
    }

    /// The filter this query runs.
    #[must_use]
    pub const fn filter(&self) -> &ComponentFilter {
        &self.filter
    }

    /// Matching archetype ids in creation order.
    #[must_use]
    pub fn ids(&self) -> &[ArchetypeId] {
        &self.ids
    }

    /// Iterates the snapshot. Can be called any number of times.
    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'_, ArchetypeId>> {
        self.ids.iter().copied()
    }

    /// Number of matching archetypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<'a> IntoIterator for &'a ArchetypeQuery {
    type Item = ArchetypeId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, ArchetypeId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TypedBuffer;
    use crate::schema::{ComponentSchema, Shape, ID_COMPONENT};

    fn archetypes(sets: &[&[&str]]) -> Vec<Archetype> {
        sets.iter()
            .enumerate()
            .map(|(i, names)| {
                let mut columns = vec![TypedBuffer::new(ID_COMPONENT, &ComponentSchema::id())];
                columns.extend(
                    names
                        .iter()
                        .map(|n| TypedBuffer::new(*n, &ComponentSchema::new(Shape::U32))),
                );
                #[allow(clippy::cast_possible_truncation)]
                Archetype::new(ArchetypeId::new(i as u32), columns).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_include_and_exclude() {
        let all = archetypes(&[&["a"], &["a", "b"], &["a", "b", "c"], &["b", "d"]]);
        let query = ArchetypeQuery::new(ComponentFilter::new(["a", "b"], ["c"]), &all);
        assert_eq!(query.ids(), [ArchetypeId::new(1)]);

        let everything = ArchetypeQuery::new(ComponentFilter::new(["id"], Vec::<String>::new()), &all);
        assert_eq!(everything.len(), 4);
    }

    #[test]
    fn test_snapshot_is_restartable_and_refreshable() {
        let mut all = archetypes(&[&["a"], &["b"]]);
        let mut query = ArchetypeQuery::new(ComponentFilter::new(["a"], Vec::<String>::new()), &all);

        let first: Vec<_> = query.iter().collect();
        let second: Vec<_> = (&query).into_iter().collect();
        assert_eq!(first, second);

        all.extend(archetypes(&[&["x"], &["x"], &["a", "x"]]).into_iter().skip(2));
        assert_eq!(query.len(), 1);
        query.refresh(&all);
        assert_eq!(query.len(), 2);
    }
}
