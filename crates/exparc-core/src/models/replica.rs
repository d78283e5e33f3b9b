//! Locations and replicas: where the physical copies of a datafile live.

use serde::{Deserialize, Serialize};

use crate::location_types::LocationKind;

/// A named storage endpoint. The transfer provider serving it is bound by name
/// at configuration-resolution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub kind: LocationKind,
    pub url: String,
}

impl Location {
    pub fn is_online(&self) -> bool {
        self.kind == LocationKind::Online
    }
}

/// One physical copy of one datafile at one location.
///
/// Replicas are never re-addressed in place: replacing a copy means creating a
/// new replica and retiring the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    pub id: i64,
    pub datafile_id: i64,
    /// Transport-addressable locator. Offline replicas carry the in-bundle
    /// path as the URL fragment.
    pub url: String,
    pub protocol: String,
    pub verified: bool,
    pub stay_remote: bool,
    pub location_id: i64,
}

/// Fields of a replica that is about to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReplica {
    pub datafile_id: i64,
    pub url: String,
    pub protocol: String,
    pub verified: bool,
    pub stay_remote: bool,
    pub location_id: i64,
}

/// A replica together with the location that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedReplica {
    pub replica: Replica,
    pub location: Location,
}

/// Pick the replica to read a datafile from: a verified online copy when one
/// exists, otherwise the first verified copy. With `verified_only == false`
/// unverified copies are considered after verified ones.
pub fn select_preferred_replica(
    replicas: &[LocatedReplica],
    verified_only: bool,
) -> Option<&LocatedReplica> {
    let rank = |r: &LocatedReplica| match (r.replica.verified, r.location.is_online()) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    };

    replicas
        .iter()
        .filter(|r| !verified_only || r.replica.verified)
        .min_by_key(|r| rank(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(id: i64, verified: bool, kind: LocationKind) -> LocatedReplica {
        LocatedReplica {
            replica: Replica {
                id,
                datafile_id: 1,
                url: format!("file:///data/{}", id),
                protocol: String::new(),
                verified,
                stay_remote: false,
                location_id: id,
            },
            location: Location {
                id,
                name: format!("loc{}", id),
                kind,
                url: "file:///data".to_string(),
            },
        }
    }

    #[test]
    fn prefers_verified_online_copy() {
        let replicas = vec![
            located(1, true, LocationKind::Offline),
            located(2, false, LocationKind::Online),
            located(3, true, LocationKind::Online),
        ];
        let chosen = select_preferred_replica(&replicas, true).unwrap();
        assert_eq!(chosen.replica.id, 3);
    }

    #[test]
    fn verified_only_excludes_unverified_copies() {
        let replicas = vec![located(2, false, LocationKind::Online)];
        assert!(select_preferred_replica(&replicas, true).is_none());
        assert_eq!(
            select_preferred_replica(&replicas, false).unwrap().replica.id,
            2
        );
    }

    #[test]
    fn ties_keep_first_encountered() {
        let replicas = vec![
            located(5, true, LocationKind::Online),
            located(6, true, LocationKind::Online),
        ];
        assert_eq!(
            select_preferred_replica(&replicas, true).unwrap().replica.id,
            5
        );
    }
}
