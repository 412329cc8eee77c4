//! `roomctl areas`: enumerate the areas of the active hub next to the beacons
//! mapped to each of them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::beacon::BeaconMapping;
use crate::hub;
use crate::hub::Area;
use crate::hub::Hub;
use crate::hub::HubError;

/// Fetch the areas of `hub` and render the listing.
pub async fn report(hub: &dyn Hub, mapping: &BeaconMapping) -> Result<String, HubError> {
    let areas = hub::list_areas(hub).await?;
    tracing::debug!("[{}] Listed {} area(s)", hub.url(), areas.len());
    Ok(render(hub.url(), &areas, mapping))
}

pub fn render(hub_url: &str, areas: &[Area], mapping: &BeaconMapping) -> String {
    let mut beacons: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, room) in mapping.iter() {
        *beacons.entry(room.as_str()).or_default() += 1;
    }

    let id_width = areas
        .iter()
        .map(|a| a.area_id.chars().count())
        .chain(std::iter::once("ID".len()))
        .max()
        .unwrap_or(0);
    let name_width = areas
        .iter()
        .map(|a| a.name.chars().count())
        .chain(std::iter::once("Name".len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(out, "Areas on {}", hub_url);
    let _ = writeln!(
        out,
        "{:<iw$}  {:<nw$}  Beacons",
        "ID",
        "Name",
        iw = id_width,
        nw = name_width
    );
    for area in areas {
        let count = match beacons.get(area.area_id.as_str()) {
            Some(n) => n.to_string(),
            None => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<iw$}  {:<nw$}  {}",
            area.area_id,
            area.name,
            count,
            iw = id_width,
            nw = name_width
        );
    }
    let _ = writeln!(out, "Total: {} area(s)", areas.len());

    let known: BTreeSet<&str> = areas.iter().map(|a| a.area_id.as_str()).collect();
    let unknown: Vec<&str> = beacons
        .keys()
        .copied()
        .filter(|room| !known.contains(room))
        .collect();
    if !unknown.is_empty() {
        let _ = writeln!(
            out,
            "Mapped to areas the hub does not know: {}",
            unknown.join(", ")
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::RoomId;
    use crate::hub::MockHub;
    use macaddr::MacAddr6;

    fn mapping() -> BeaconMapping {
        BeaconMapping::new([
            (MacAddr6::new(0xAA, 0, 0, 0, 0, 1), RoomId::new("cucina")),
            (MacAddr6::new(0xAA, 0, 0, 0, 0, 2), RoomId::new("cucina")),
            (MacAddr6::new(0xAA, 0, 0, 0, 0, 3), RoomId::new("garage")),
        ])
    }

    #[test]
    fn test_render() {
        let areas = vec![
            Area::new("cucina", "Cucina"),
            Area::new("camera_da_letto", "Camera da letto"),
        ];
        insta::assert_snapshot!(render("http://ha.local:8123", &areas, &mapping()), @r"
        Areas on http://ha.local:8123
        ID               Name             Beacons
        cucina           Cucina           2
        camera_da_letto  Camera da letto  -
        Total: 2 area(s)
        Mapped to areas the hub does not know: garage
        ");
    }

    #[test]
    fn test_render_empty() {
        let text = render("http://ha", &[], &BeaconMapping::default());
        assert!(text.contains("Total: 0 area(s)"));
        assert!(!text.contains("does not know"));
    }

    #[tokio::test]
    async fn test_report_sorted_from_registry() {
        let hub = MockHub::new("http://ha")
            .with_area(Area::new("ufficio", "Ufficio"), &[])
            .with_area(Area::new("cucina", "Cucina"), &[]);

        let text = report(&hub, &mapping()).await.unwrap();
        let cucina = text.find("cucina").unwrap();
        let ufficio = text.find("ufficio").unwrap();
        assert!(cucina < ufficio);
        assert!(text.contains("Total: 2 area(s)"));
    }

    #[tokio::test]
    async fn test_report_without_registry() {
        let hub = MockHub::new("http://ha")
            .with_area(Area::new("cucina", "Cucina"), &[])
            .without_registry();

        let text = report(&hub, &BeaconMapping::default()).await.unwrap();
        assert!(text.contains("Cucina"));
    }
}
