//! Authorization seam for permanent deletion

use std::collections::HashSet;

use super::types::Resource;

/// Decides who may permanently delete a resource
pub trait DeletePolicy: Send + Sync + std::fmt::Debug {
    fn may_delete(&self, actor_id: &str, resource: &Resource) -> bool;
}

/// Lets every actor delete
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl DeletePolicy for AllowAll {
    fn may_delete(&self, _actor_id: &str, _resource: &Resource) -> bool {
        true
    }
}

/// Only the listed actors may delete
#[derive(Debug, Default, Clone)]
pub struct ActorAllowList {
    actors: HashSet<String>,
}

impl ActorAllowList {
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actors: actors.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeletePolicy for ActorAllowList {
    fn may_delete(&self, actor_id: &str, _resource: &Resource) -> bool {
        self.actors.contains(actor_id)
    }
}
