use crate::models::{item::NewItem, trip::TripType};

/// Japan-ish bounding box. Coordinates outside it (or NaN, which fails
/// every comparison) select the international template.
const DOMESTIC_LAT: (f64, f64) = (20.0, 45.0);
const DOMESTIC_LON: (f64, f64) = (122.0, 153.0);

const DOMESTIC_ITEMS: &[&str] = &[
    "財布・現金",
    "スマートフォン",
    "充電器",
    "歯ブラシ",
    "化粧品・スキンケア",
    "折りたたみ傘",
];

/// Items shared by the whole party, only for group trips.
const GROUP_ITEMS: &[&str] = &["救急セット", "レジャーシート"];

/// Clothing-style rows whose quantity scales with the trip length.
const DAILY_ITEMS: &[&str] = &["服", "下着・靴下", "タオル"];

pub fn is_domestic(latitude: f64, longitude: f64) -> bool {
    latitude >= DOMESTIC_LAT.0
        && latitude <= DOMESTIC_LAT.1
        && longitude >= DOMESTIC_LON.0
        && longitude <= DOMESTIC_LON.1
}

/// Builds the default checklist rows for a freshly created trip, ready for a
/// bulk insert: one of four static base lists (domestic/international ×
/// personal/group) followed by the day-scaled rows.
pub fn generate_checklist(
    trip_id: i64,
    latitude: f64,
    longitude: f64,
    days: i64,
    trip_type: TripType,
) -> Vec<NewItem> {
    let mut rows = Vec::new();

    if !is_domestic(latitude, longitude) {
        rows.push(base_row(trip_id, "パスポート"));
    }
    for name in DOMESTIC_ITEMS {
        rows.push(base_row(trip_id, name));
    }
    if trip_type == TripType::Group {
        for name in GROUP_ITEMS {
            rows.push(base_row(trip_id, name));
        }
    }
    for name in DAILY_ITEMS {
        rows.push(NewItem {
            trip_id,
            item_name: (*name).to_string(),
            quantity: days,
            is_checked: false,
        });
    }

    rows
}

fn base_row(trip_id: i64, name: &str) -> NewItem {
    NewItem {
        trip_id,
        item_name: name.to_string(),
        quantity: 1,
        is_checked: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(rows: &[NewItem]) -> Vec<&str> {
        rows.iter().map(|row| row.item_name.as_str()).collect()
    }

    #[test]
    fn tokyo_three_days_uses_domestic_template() {
        let rows = generate_checklist(1, 35.0, 139.0, 3, TripType::Personal);
        assert!(!names(&rows).contains(&"パスポート"));
        assert_eq!(rows.len(), DOMESTIC_ITEMS.len() + DAILY_ITEMS.len());

        let daily: Vec<_> = rows.iter().filter(|row| row.quantity == 3).collect();
        assert_eq!(daily.len(), DAILY_ITEMS.len());
        assert!(rows
            .iter()
            .filter(|row| row.quantity == 1)
            .all(|row| !DAILY_ITEMS.contains(&row.item_name.as_str())));
    }

    #[test]
    fn paris_includes_passport() {
        let rows = generate_checklist(1, 48.0, 2.0, 2, TripType::Personal);
        assert_eq!(names(&rows).first(), Some(&"パスポート"));
    }

    #[test]
    fn group_trip_adds_shared_items() {
        let rows = generate_checklist(1, 35.0, 139.0, 2, TripType::Group);
        let names = names(&rows);
        assert!(names.contains(&"救急セット"));
        assert!(names.contains(&"レジャーシート"));
    }

    #[test]
    fn personal_trip_has_no_shared_items() {
        let rows = generate_checklist(1, 35.0, 139.0, 2, TripType::Personal);
        assert!(!names(&rows).contains(&"救急セット"));
    }

    #[test]
    fn nan_coordinates_classify_as_international() {
        assert!(!is_domestic(f64::NAN, 139.0));
        assert!(!is_domestic(35.0, f64::NAN));
        let rows = generate_checklist(1, f64::NAN, f64::NAN, 1, TripType::Personal);
        assert!(names(&rows).contains(&"パスポート"));
    }

    #[test]
    fn every_row_starts_unchecked_and_bound_to_the_trip() {
        let rows = generate_checklist(42, 35.0, 139.0, 4, TripType::Group);
        assert!(rows.iter().all(|row| !row.is_checked && row.trip_id == 42));
    }

    #[test]
    fn bounding_box_edges_are_inclusive() {
        assert!(is_domestic(20.0, 122.0));
        assert!(is_domestic(45.0, 153.0));
        assert!(!is_domestic(19.9, 139.0));
        assert!(!is_domestic(35.0, 153.1));
    }
}
