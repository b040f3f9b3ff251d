//! Logical GEDI collection names and their job defaults

/// Defaults applied when a job names a collection logically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionDefaults {
    pub name: &'static str,
    pub doi: &'static str,
    pub lat: &'static str,
    pub lon: &'static str,
    pub columns: &'static [&'static str],
    pub query: &'static str,
}

pub const COLLECTIONS: &[CollectionDefaults] = &[
    CollectionDefaults {
        name: "L1B",
        doi: "10.5067/GEDI/GEDI01_B.002",
        lat: "geolocation/latitude_bin0",
        lon: "geolocation/longitude_bin0",
        columns: &[
            "shot_number",
            "geolocation/degrade",
            "stale_return_flag",
            "geolocation/elevation_bin0",
            "geolocation/solar_elevation",
        ],
        query: "stale_return_flag == 0 and geolocation/degrade == 0",
    },
    CollectionDefaults {
        name: "L2A",
        doi: "10.5067/GEDI/GEDI02_A.002",
        lat: "lat_lowestmode",
        lon: "lon_lowestmode",
        columns: &[
            "shot_number",
            "quality_flag",
            "degrade_flag",
            "sensitivity",
            "elev_lowestmode",
            "rh[98]",
        ],
        query: "quality_flag == 1 and degrade_flag == 0",
    },
    CollectionDefaults {
        name: "L2B",
        doi: "10.5067/GEDI/GEDI02_B.002",
        lat: "geolocation/lat_lowestmode",
        lon: "geolocation/lon_lowestmode",
        columns: &[
            "shot_number",
            "l2b_quality_flag",
            "algorithmrun_flag",
            "sensitivity",
            "cover",
            "pai",
            "fhd_normal",
        ],
        query: "l2b_quality_flag == 1 and algorithmrun_flag == 1",
    },
    CollectionDefaults {
        name: "L4A",
        doi: "10.3334/ORNLDAAC/2056",
        lat: "lat_lowestmode",
        lon: "lon_lowestmode",
        columns: &[
            "agbd",
            "agbd_se",
            "l2_quality_flag",
            "l4_quality_flag",
            "sensitivity",
            "geolocation/sensitivity_a2",
        ],
        query: "l2_quality_flag == 1 and l4_quality_flag == 1 and sensitivity > 0.95 and `geolocation/sensitivity_a2` > 0.95",
    },
    CollectionDefaults {
        name: "L4C",
        doi: "10.3334/ORNLDAAC/2338",
        lat: "lat_lowestmode",
        lon: "lon_lowestmode",
        columns: &[
            "wsci",
            "wsci_pi_lower",
            "wsci_pi_upper",
            "wsci_quality_flag",
            "fusion_quality_flag",
        ],
        query: "wsci_quality_flag == 1 and fusion_quality_flag == 1",
    },
];

/// Defaults for a logical name, case-insensitively
pub fn lookup(name: &str) -> Option<&'static CollectionDefaults> {
    let name = name.trim();
    COLLECTIONS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Defaults for a logical name or for the DOI it stands for
pub fn lookup_any(name_or_doi: &str) -> Option<&'static CollectionDefaults> {
    let name_or_doi = name_or_doi.trim();
    lookup(name_or_doi).or_else(|| {
        COLLECTIONS
            .iter()
            .find(|c| c.doi.eq_ignore_ascii_case(name_or_doi))
    })
}

/// The DOI for a logical name; anything else passes through verbatim
pub fn canonical_doi(name_or_doi: &str) -> &str {
    lookup(name_or_doi).map(|c| c.doi).unwrap_or(name_or_doi)
}

pub fn logical_names() -> Vec<&'static str> {
    COLLECTIONS.iter().map(|c| c.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use subset::{ColumnSpec, Query};

    #[test]
    fn test_canonical_doi() {
        assert_eq!(canonical_doi("L4A"), "10.3334/ORNLDAAC/2056");
        assert_eq!(canonical_doi("l2a"), "10.5067/GEDI/GEDI02_A.002");
        assert_eq!(canonical_doi("10.5067/GEDI/GEDI02_B.002"), "10.5067/GEDI/GEDI02_B.002");
        assert_eq!(canonical_doi("L3"), "L3");
        assert_eq!(lookup_any("10.3334/ORNLDAAC/2338").map(|c| c.name), Some("L4C"));
    }

    #[test]
    fn test_defaults_parse() {
        for defaults in COLLECTIONS {
            ColumnSpec::parse(defaults.lat).unwrap();
            ColumnSpec::parse(defaults.lon).unwrap();
            for column in defaults.columns {
                ColumnSpec::parse(column).unwrap();
            }
            assert!(Query::parse(defaults.query).unwrap().is_some(), "{}", defaults.name);
        }
        assert_eq!(logical_names(), vec!["L1B", "L2A", "L2B", "L4A", "L4C"]);
    }
}
