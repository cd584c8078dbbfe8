use std::collections::HashSet;

use crate::models::trip::{Trip, TripLink, TripType};

/// One row of the trip list: the visible trip plus, when a link exists, the
/// other half of the personal/group pair. The personal trip is always the
/// visible one.
#[derive(Debug, Clone)]
pub struct TripListEntry {
    pub trip: Trip,
    pub linked_trip: Option<Trip>,
}

impl TripListEntry {
    pub fn is_linked(&self) -> bool {
        self.linked_trip.is_some()
    }
}

/// Collapses linked personal/group pairs into single entries, preserving the
/// incoming order. The first link for a trip wins; a pair is emitted once.
pub fn resolve_trip_list(trips: &[Trip], links: &[TripLink]) -> Vec<TripListEntry> {
    let mut consumed: HashSet<i64> = HashSet::new();
    let mut entries = Vec::new();

    for trip in trips {
        if consumed.contains(&trip.trip_id) {
            continue;
        }

        let partner_id = linked_trip_id(trip, links);
        let partner = partner_id.and_then(|id| trips.iter().find(|t| t.trip_id == id));

        match partner {
            // Partner already shown as part of an earlier pair: the trip is
            // dropped rather than shown twice.
            Some(partner) if consumed.contains(&partner.trip_id) => {
                consumed.insert(trip.trip_id);
            }
            Some(partner) => {
                consumed.insert(trip.trip_id);
                consumed.insert(partner.trip_id);
                // Personal side is the visible tab of a linked pair.
                let (personal, group) = if trip.trip_type() == TripType::Personal {
                    (trip.clone(), partner.clone())
                } else {
                    (partner.clone(), trip.clone())
                };
                entries.push(TripListEntry {
                    trip: personal,
                    linked_trip: Some(group),
                });
            }
            None => {
                consumed.insert(trip.trip_id);
                entries.push(TripListEntry {
                    trip: trip.clone(),
                    linked_trip: None,
                });
            }
        }
    }

    entries
}

/// The other half of a trip's link, if any. First matching link wins.
pub fn linked_trip_id(trip: &Trip, links: &[TripLink]) -> Option<i64> {
    match trip.trip_type() {
        TripType::Personal => links
            .iter()
            .find(|link| link.personal_trip_id == trip.trip_id)
            .map(|link| link.group_trip_id),
        TripType::Group => links
            .iter()
            .find(|link| link.group_trip_id == trip.trip_id)
            .map(|link| link.personal_trip_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trip(trip_id: i64, trip_type: &str) -> Trip {
        Trip {
            trip_id,
            user_id: 1,
            location_name: "京都".into(),
            latitude: Some(35.0),
            longitude: Some(135.7),
            start_date: "2025-07-10".parse().unwrap(),
            end_date: "2025-07-12".parse().unwrap(),
            trip_type: trip_type.into(),
            group_id: if trip_type == "group" { Some(7) } else { None },
            created_at: Utc::now(),
        }
    }

    fn link(link_id: i64, group_trip_id: i64, personal_trip_id: i64) -> TripLink {
        TripLink {
            link_id,
            group_trip_id,
            personal_trip_id,
            user_id: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn linked_pair_collapses_to_personal_entry() {
        let trips = vec![trip(1, "personal"), trip(2, "group")];
        let entries = resolve_trip_list(&trips, &[link(1, 2, 1)]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trip.trip_id, 1);
        assert_eq!(entries[0].linked_trip.as_ref().unwrap().trip_id, 2);
    }

    #[test]
    fn group_trip_seen_first_still_surfaces_the_personal_side() {
        let trips = vec![trip(2, "group"), trip(1, "personal")];
        let entries = resolve_trip_list(&trips, &[link(1, 2, 1)]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trip.trip_id, 1);
        assert!(entries[0].is_linked());
    }

    #[test]
    fn unlinked_trips_pass_through() {
        let trips = vec![trip(1, "personal"), trip(2, "group")];
        let entries = resolve_trip_list(&trips, &[]);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| !entry.is_linked()));
    }

    #[test]
    fn first_link_wins_for_a_doubly_linked_trip() {
        let trips = vec![trip(1, "personal"), trip(2, "group"), trip(3, "group")];
        let entries = resolve_trip_list(&trips, &[link(1, 2, 1), link(2, 3, 1)]);
        // Trip 3's only partner was consumed by the first pair, so it is
        // dropped instead of duplicating trip 1.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trip.trip_id, 1);
        assert_eq!(entries[0].linked_trip.as_ref().unwrap().trip_id, 2);
    }

    #[test]
    fn link_to_an_invisible_trip_is_ignored() {
        let trips = vec![trip(1, "personal")];
        let entries = resolve_trip_list(&trips, &[link(1, 99, 1)]);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_linked());
    }
}
