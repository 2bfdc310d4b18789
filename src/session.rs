use std::collections::BTreeMap;

use tinsel_core::{apply_patch, Board, Collection, TeamDocument, TeamId, TeamPatch};

/// Read-only view of a team session handed to the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub team: TeamId,
    pub coins: i64,
    pub board: Board,
    pub collection: Collection,
    pub missions: BTreeMap<String, u32>,
    /// Revision of the last remote snapshot, `None` before the first one.
    pub revision: Option<u64>,
    /// True while local optimistic changes have not been overwritten by a snapshot.
    pub provisional: bool,
}

impl SessionSnapshot {
    pub fn mission_count(&self, mission_id: &str) -> u32 {
        self.missions.get(mission_id).copied().unwrap_or(0)
    }
}

/// Local, disposable mirror of one team document.
#[derive(Clone, Debug)]
pub struct TeamSession {
    team: TeamId,
    mirror: TeamDocument,
    revision: Option<u64>,
    provisional: bool,
}

impl TeamSession {
    pub fn new(team: TeamId, starting_coins: i64) -> Self {
        Self {
            team,
            mirror: TeamDocument::new(starting_coins),
            revision: None,
            provisional: false,
        }
    }

    pub fn team(&self) -> TeamId {
        self.team
    }

    pub fn coins(&self) -> i64 {
        self.mirror.coins
    }

    pub fn board(&self) -> &Board {
        &self.mirror.board
    }

    pub fn collection(&self) -> &Collection {
        &self.mirror.collection
    }

    pub fn mission_count(&self, mission_id: &str) -> u32 {
        self.mirror.mission_count(mission_id)
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Applies the same patch that is about to be sent to the store.
    pub fn apply_local(&mut self, patch: &TeamPatch) {
        if apply_patch(&mut self.mirror, patch) {
            self.provisional = true;
        }
    }

    /// Replaces every field with the remote document, dropping non-tile values.
    pub fn overwrite(&mut self, document: &TeamDocument) {
        self.mirror = document.clone().sanitize();
        self.revision = Some(document.revision);
        self.provisional = false;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            team: self.team,
            coins: self.mirror.coins,
            board: self.mirror.board,
            collection: self.mirror.collection.clone(),
            missions: self.mirror.missions.clone(),
            revision: self.revision,
            provisional: self.provisional,
        }
    }
}
