// src/geography.rs
//
// County names and map positions, keyed by county_id. Kept beside the store
// rather than in it so the store columns stay fixed.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::EaiError;
use crate::process::utils::clean_str;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyLocation {
    pub county_id: String,
    pub county_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Parse the Census gazetteer (tab-delimited; `GEOID`, `NAME`, `INTPTLAT`,
/// `INTPTLONG`). Rows without usable coordinates are dropped.
pub fn parse_gazetteer(text: &str) -> Result<Vec<CountyLocation>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .context("reading gazetteer header")?
        .iter()
        .map(clean_str)
        .collect();
    let col = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| EaiError::SchemaMismatch(format!("gazetteer lacks `{}`", name)))
    };
    let (geoid, name) = (col("GEOID")?, col("NAME")?);
    let (lat, lon) = (col("INTPTLAT")?, col("INTPTLONG")?);

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.context("reading gazetteer row")?;
        let field = |i: usize| record.get(i).map(clean_str).unwrap_or_default();
        let (Ok(latitude), Ok(longitude)) = (field(lat).parse::<f64>(), field(lon).parse::<f64>())
        else {
            continue;
        };
        out.push(CountyLocation {
            county_id: format!("{:0>5}", field(geoid)),
            county_name: field(name),
            latitude,
            longitude,
        });
    }
    Ok(out)
}

/// Write locations as CSV, atomically.
pub fn write_locations(path: &Path, locations: &[CountyLocation]) -> Result<()> {
    stage_locations(path, locations)?
        .persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    debug!(path = %path.display(), rows = locations.len(), "wrote county locations");
    Ok(())
}

/// Write the CSV into a temporary file beside `path`; `path` is untouched
/// until the result is persisted.
pub fn stage_locations(path: &Path, locations: &[CountyLocation]) -> Result<NamedTempFile> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut wtr = csv::Writer::from_writer(tmp.as_file_mut());
        for loc in locations {
            wtr.serialize(loc)?;
        }
        wtr.flush()?;
    }
    tmp.as_file_mut().flush()?;
    Ok(tmp)
}

pub fn read_locations(path: &Path) -> Result<Vec<CountyLocation>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    rdr.deserialize()
        .collect::<Result<Vec<CountyLocation>, _>>()
        .with_context(|| format!("reading {}", path.display()))
}

/// Approximate centre of each state, by two-digit state FIPS.
static STATE_CENTROIDS: &[(u32, f64, f64)] = &[
    (1, 32.7, -86.8),
    (2, 64.0, -153.0),
    (4, 34.2, -111.5),
    (5, 35.2, -92.4),
    (6, 36.7, -119.7),
    (8, 39.0, -105.5),
    (9, 41.6, -72.7),
    (10, 39.0, -75.5),
    (11, 38.9, -77.0),
    (12, 27.8, -81.7),
    (13, 32.9, -83.2),
    (15, 21.1, -157.8),
    (16, 44.2, -114.5),
    (17, 40.3, -89.0),
    (18, 39.8, -86.1),
    (19, 42.0, -93.2),
    (20, 38.5, -96.7),
    (21, 37.7, -84.9),
    (22, 31.1, -91.8),
    (23, 44.6, -69.8),
    (24, 39.0, -76.8),
    (25, 42.2, -71.5),
    (26, 43.3, -84.5),
    (27, 45.7, -93.9),
    (28, 32.7, -89.7),
    (29, 38.4, -92.2),
    (30, 47.0, -110.0),
    (31, 41.1, -98.0),
    (32, 38.4, -117.0),
    (33, 43.4, -71.5),
    (34, 40.3, -74.5),
    (35, 34.8, -106.2),
    (36, 42.1, -74.9),
    (37, 35.6, -79.0),
    (38, 47.5, -99.8),
    (39, 40.3, -82.8),
    (40, 35.6, -96.9),
    (41, 44.5, -122.0),
    (42, 40.5, -77.5),
    (44, 41.7, -71.5),
    (45, 33.8, -80.9),
    (46, 44.2, -99.8),
    (47, 35.7, -86.0),
    (48, 31.0, -97.5),
    (49, 40.1, -111.9),
    (50, 44.0, -72.7),
    (51, 37.7, -78.2),
    (53, 47.3, -121.0),
    (54, 38.4, -80.9),
    (55, 44.3, -89.6),
    (56, 42.7, -107.3),
];

/// Centre of the conterminous US, used when nothing better is known.
pub const US_CENTER: (f64, f64) = (39.0, -98.0);

/// Spread counties of a state around its centroid, deterministically by
/// county code. Only used when the gazetteer has no entry.
pub fn approximate_location(county_id: &str) -> (f64, f64) {
    if county_id.len() != 5 {
        return US_CENTER;
    }
    let (Ok(state), Ok(county)) = (county_id[..2].parse::<u32>(), county_id[2..].parse::<u32>())
    else {
        return US_CENTER;
    };
    let (lat, lng) = STATE_CENTROIDS
        .iter()
        .find(|(fips, _, _)| *fips == state)
        .map(|(_, lat, lng)| (*lat, *lng))
        .unwrap_or(US_CENTER);

    let lat_offset = ((county % 20) as f64 - 10.0) * 0.15;
    let lng_offset = (((county / 20) % 20) as f64 - 10.0) * 0.2;
    (lat + lat_offset, lng + lng_offset)
}

/// Join source county names with gazetteer positions. Gazetteer names are
/// used when the source has none; approximated positions fill the gaps.
pub fn build_sidecar(
    names: &BTreeMap<String, String>,
    gazetteer: &[CountyLocation],
) -> Vec<CountyLocation> {
    let by_id: BTreeMap<&str, &CountyLocation> =
        gazetteer.iter().map(|l| (l.county_id.as_str(), l)).collect();
    let mut approximated = 0usize;

    let out: Vec<CountyLocation> = names
        .iter()
        .map(|(id, name)| match by_id.get(id.as_str()) {
            Some(loc) => CountyLocation {
                county_id: id.clone(),
                county_name: if name.is_empty() { loc.county_name.clone() } else { name.clone() },
                latitude: loc.latitude,
                longitude: loc.longitude,
            },
            None => {
                approximated += 1;
                let (latitude, longitude) = approximate_location(id);
                CountyLocation {
                    county_id: id.clone(),
                    county_name: name.clone(),
                    latitude,
                    longitude,
                }
            }
        })
        .collect();

    info!(counties = out.len(), approximated, "built county sidecar");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const GAZ: &str = "USPS\tGEOID\tANSICODE\tNAME\tALAND\tAWATER\tALAND_SQMI\tAWATER_SQMI\tINTPTLAT\tINTPTLONG                                                                                                               \n\
AL\t01001\t00161526\tAutauga County\t1539634184\t25674812\t594.456\t9.913\t32.532237\t-86.64644\n\
AL\t1003\t00161527\tBaldwin County\t4117656514\t1132955729\t1589.836\t437.437\t30.659218\t-87.746067\n\
AL\t01005\t00161528\tBarbour County\t2292160149\t50523213\t885.008\t19.507\t\t\n";

    #[test]
    fn parses_gazetteer_and_pads_geoid() -> Result<()> {
        let locs = parse_gazetteer(GAZ)?;
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].county_id, "01001");
        assert_eq!(locs[0].county_name, "Autauga County");
        assert!((locs[0].latitude - 32.532237).abs() < 1e-9);
        assert_eq!(locs[1].county_id, "01003");
        Ok(())
    }

    #[test]
    fn gazetteer_without_coordinates_is_a_mismatch() {
        let err = parse_gazetteer("GEOID\tNAME\n01001\tA\n").unwrap_err();
        assert!(err.to_string().contains("INTPTLAT"));
    }

    #[test]
    fn locations_round_trip_through_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("counties.csv");
        let locs = parse_gazetteer(GAZ)?;
        write_locations(&path, &locs)?;
        assert_eq!(read_locations(&path)?, locs);
        Ok(())
    }

    #[test]
    fn approximation_stays_near_the_state() {
        let (lat, lng) = approximate_location("06037");
        assert!((lat - 36.7).abs() <= 1.5 && (lng + 119.7).abs() <= 2.0);
        assert_eq!(approximate_location("bogus"), US_CENTER);
        // unknown state code falls back to the US centre plus offset
        let (lat, _) = approximate_location("99001");
        assert!((lat - (US_CENTER.0 - 9.0 * 0.15)).abs() < 1e-9);
    }

    #[test]
    fn sidecar_prefers_gazetteer_positions() -> Result<()> {
        let gaz = parse_gazetteer(GAZ)?;
        let mut names = BTreeMap::new();
        names.insert("01001".to_string(), "Autauga, AL".to_string());
        names.insert("02013".to_string(), "Aleutians East, AK".to_string());

        let side = build_sidecar(&names, &gaz);
        assert_eq!(side.len(), 2);
        assert_eq!(side[0].county_name, "Autauga, AL");
        assert!((side[0].longitude + 86.64644).abs() < 1e-9);
        assert_eq!(side[1].county_id, "02013");
        assert_eq!((side[1].latitude, side[1].longitude), approximate_location("02013"));
        Ok(())
    }
}
