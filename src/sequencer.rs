//! Per-break fallback sequence over the configured ad sources.

use crate::config::{AdSourceConfig, AdTag, Provider};
use crate::response::AdSource;
use std::collections::VecDeque;

enum Pending {
    Tag(AdTag),
    Document(Provider),
}

impl Pending {
    fn resolve(self) -> AdSource {
        match self {
            Pending::Tag(tag) => AdSource::Url(tag.resolve()),
            Pending::Document(provider) => AdSource::Document(provider.call()),
        }
    }
}

/// Ordered fallback list of ad sources for one break.
///
/// Built fresh for every break from the configured sources. Dynamic tags and
/// document providers are only resolved when their turn comes, so a provider
/// is called at most once per break.
pub struct AdSourceSequencer {
    pending: VecDeque<Pending>,
    attempted: usize,
}

impl AdSourceSequencer {
    pub fn for_break(config: &AdSourceConfig) -> Self {
        let pending = match config {
            AdSourceConfig::Tag(tag) => VecDeque::from([Pending::Tag(tag.clone())]),
            AdSourceConfig::Queue(tags) => tags.iter().cloned().map(Pending::Tag).collect(),
            AdSourceConfig::Document(provider) => {
                VecDeque::from([Pending::Document(provider.clone())])
            }
        };
        Self {
            pending,
            attempted: 0,
        }
    }

    /// Next candidate, or `None` once the sequence is exhausted.
    pub fn next_source(&mut self) -> Option<AdSource> {
        let next = self.pending.pop_front()?;
        self.attempted += 1;
        Some(next.resolve())
    }

    pub fn has_more(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Sources handed out so far.
    pub fn attempted(&self) -> usize {
        self.attempted
    }
}
