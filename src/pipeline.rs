//! Run context and stage sequencing.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::geometry::{GeoEngine, GeometryEngine};
use crate::models::{AdminLevel, CountryRegistry};
use crate::names::NameTables;
use crate::rules::RuleBook;
use crate::stages::{run_stage, Stage, StageReport};

/// Everything a stage needs, loaded once and shared read-only by all workers
pub struct PipelineContext {
    pub config: Config,
    pub registry: CountryRegistry,
    pub names: NameTables,
    pub rules: RuleBook,
    engine: Box<dyn GeometryEngine>,
}

impl PipelineContext {
    pub fn load(config: Config) -> Result<Self> {
        let registry = CountryRegistry::load_csv(&config.tables.countries)
            .context("Failed to load country registry")?;
        let names = NameTables::load(&config.tables.names).context("Failed to load name tables")?;
        let rules = RuleBook::load(&config.tables.rules).context("Failed to load fix rules")?;
        let engine = Box::new(GeoEngine::with_tolerance(config.run.tolerance));
        Ok(Self::from_parts(config, registry, names, rules, engine))
    }

    pub fn from_parts(
        config: Config,
        registry: CountryRegistry,
        names: NameTables,
        rules: RuleBook,
        engine: Box<dyn GeometryEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            names,
            rules,
            engine,
        }
    }

    /// Deepest admin level any stage looks for
    pub fn max_level(&self) -> AdminLevel {
        AdminLevel::new(self.config.run.max_level).unwrap_or(AdminLevel::MAX)
    }

    pub fn engine(&self) -> &dyn GeometryEngine {
        self.engine.as_ref()
    }

    /// Run `stages` in order over the selected countries.
    pub fn run(&self, stages: &[Stage]) -> Result<Vec<StageReport>> {
        let countries = self.registry.selected(&self.config.run.iso3);
        info!(
            "Running {} stages over {} countries",
            stages.len(),
            countries.len()
        );

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = self.config.run.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().context("Failed to build worker pool")?;

        let mut reports = Vec::with_capacity(stages.len());
        for &stage in stages {
            let report = pool
                .install(|| run_stage(self, stage, &countries))
                .with_context(|| format!("Stage {} could not start", stage))?;
            reports.push(report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Crs;
    use crate::io::{list_artifacts, read_layer, write_layer, StageArea};
    use crate::models::{Feature, FeatureLayer, Value, WGS84};
    use crate::stages::aggregate::verify_hierarchy;
    use geo::{line_string, polygon, Area, Geometry, MapCoords, MultiPolygon};
    use hashbrown::HashSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ])
    }

    fn source_layer() -> FeatureLayer {
        let columns = [
            "ADM2_EN", "ADM2_PCODE", "ADM1_EN", "ADM1_PCODE", "ADM0_EN", "ADM0_PCODE", "date",
            "validOn", "validTo",
        ];
        let units = [
            ("North West", "TS0101", "North", "TS01", 0.0),
            ("North East", "TS0102", "North", "TS01", 1.0),
            ("South West", "TS0201", "South", "TS02", 2.0),
            ("South East", "TS0202", "South", "TS02", 3.0),
        ];
        FeatureLayer::with_features(
            columns.iter().map(|c| c.to_string()).collect(),
            WGS84,
            units
                .iter()
                .map(|&(name, code, parent, parent_code, x)| {
                    Feature::new(
                        vec![
                            Value::from(name),
                            Value::from(code),
                            Value::from(parent),
                            Value::from(parent_code),
                            Value::from(" "),
                            Value::Null,
                            Value::from("2020-01-01"),
                            Value::from("2021/06/30"),
                            Value::from("2022-01-01"),
                        ],
                        rectangle(x, 0.0, x + 1.0, 2.0),
                    )
                })
                .collect(),
        )
    }

    /// Extra TST unit east of the source ones, in Web Mercator with its own
    /// column order
    fn addition_layer() -> FeatureLayer {
        let shape =
            rectangle(4.0, 0.0, 5.0, 2.0).map_coords(|c| Crs::WebMercator.from_geographic(c));
        FeatureLayer::with_features(
            ["survey", "adm2_pcode", "adm2_name", "adm1_pcode", "adm0_pcode", "validto"]
                .map(String::from)
                .to_vec(),
            3857,
            vec![Feature::new(
                vec![
                    Value::from("2023"),
                    Value::from("TS0203"),
                    Value::from("Far East"),
                    Value::from("TS02"),
                    Value::from("TS"),
                    Value::from("2024-01-01"),
                ],
                shape,
            )],
        )
    }

    fn kashmir_layer(canonical: bool, names: [&str; 2]) -> FeatureLayer {
        let columns = if canonical {
            vec![
                "adm1_name", "adm1_pcode", "adm0_name", "adm0_pcode", "lang", "date", "validon",
                "validto",
            ]
        } else {
            vec!["ADM1_EN", "ADM1_PCODE", "ADM0_EN", "ADM0_PCODE", "date", "validOn", "validTo"]
        };
        let mut layer = FeatureLayer::new(columns.iter().map(|c| c.to_string()).collect(), WGS84);
        for (i, (name, code)) in names.iter().zip(["XI01", "XI02"]).enumerate() {
            let x = 10.0 + i as f64;
            let mut properties = vec![
                Value::from(*name),
                Value::from(code),
                Value::from("Kashmir"),
                Value::from("XI"),
            ];
            if canonical {
                properties.push(Value::from("en"));
            }
            properties.resize(columns.len(), Value::Null);
            layer.push(Feature::new(properties, rectangle(x, 0.0, x + 1.0, 1.0)));
        }
        layer
    }

    fn mask_layer(rows: Vec<(&str, Geometry<f64>)>) -> FeatureLayer {
        FeatureLayer::with_features(
            vec!["iso3cd".to_string()],
            WGS84,
            rows.into_iter()
                .map(|(code, shape)| Feature::new(vec![Value::from(code)], shape))
                .collect(),
        )
    }

    fn reference_lines() -> FeatureLayer {
        let rows = [(1, "TST", 3.0), (6, "TST", 4.0), (1, "ABC", 5.0)];
        FeatureLayer::with_features(
            vec!["bdytyp".to_string(), "iso3cd".to_string(), "objectid".to_string()],
            WGS84,
            rows.iter()
                .map(|&(kind, code, y)| {
                    Feature::new(
                        vec![Value::Int(kind), Value::from(code), Value::Int(1)],
                        Geometry::LineString(line_string![(x: -1.0, y: y), (x: 5.0, y: y)]),
                    )
                })
                .collect(),
        )
    }

    fn workspace(root: &Path) -> Config {
        let mut config = Config::with_root(root);
        config.run.max_level = 2;
        config.run.threads = Some(2);

        fs::create_dir_all(root.join("inputs")).unwrap();
        fs::write(
            &config.tables.countries,
            "iso2,iso3,numeric,name\nTS,TST,999,Testland\n",
        )
        .unwrap();
        fs::write(
            &config.tables.names[0],
            "iso3,en_short,fr_short\nTST,Testland,Testlande\n",
        )
        .unwrap();

        let hdx = config.source_dir("hdx");
        write_layer(&hdx.join("tst_adm2.json.gz"), &source_layer()).unwrap();
        write_layer(
            &hdx.join("xik_adm1.json.gz"),
            &kashmir_layer(false, ["Western", "Eastern"]),
        )
        .unwrap();
        let additions = config.source_dir(&config.sources.additions);
        write_layer(&additions.join("tst_adm2.json.gz"), &addition_layer()).unwrap();
        write_layer(
            &config.area_dir(StageArea::Reviewed).join("xik_adm1.json.gz"),
            &kashmir_layer(true, ["Reviewed West", "Reviewed East"]),
        )
        .unwrap();

        // The standard outline only covers part of XIK; the disputed one all of it
        let standard = mask_layer(vec![
            ("TST", rectangle(-1.0, -1.0, 6.0, 3.0)),
            ("XIK", rectangle(10.0, 0.0, 10.5, 1.0)),
        ]);
        let disputed = mask_layer(vec![("XIK", rectangle(9.5, -0.5, 12.5, 1.5))]);
        write_layer(&config.paths.reference.join("bnda_cty.json.gz"), &standard).unwrap();
        write_layer(&config.paths.reference.join("bnda_dsp.json.gz"), &disputed).unwrap();
        write_layer(&config.paths.reference.join("bndl.json.gz"), &reference_lines()).unwrap();
        config
    }

    #[test]
    fn test_end_to_end() {
        let dir = TempDir::new().unwrap();
        let ctx = PipelineContext::load(workspace(dir.path())).unwrap();
        let reports = ctx.run(&Stage::ALL).unwrap();

        assert_eq!(reports.len(), Stage::ALL.len());
        for report in &reports {
            assert!(!report.has_failures(), "{} failed", report.stage);
        }

        for area in StageArea::ALL {
            if area == StageArea::Reviewed {
                continue;
            }
            let files = list_artifacts(&ctx.config.area_dir(area));
            assert!(!files.is_empty(), "no artifacts in {:?}", area);
            for file in files {
                assert!(!read_layer(&file).unwrap().is_empty(), "{} is empty", file.display());
            }
        }

        let edge_matched = ctx.config.area_dir(StageArea::EdgeMatched);
        let adm2 = read_layer(&edge_matched.join("tst_adm2.json.gz")).unwrap();
        let adm1 = read_layer(&edge_matched.join("tst_adm1.json.gz")).unwrap();
        let adm0 = read_layer(&edge_matched.join("tst_adm0.json.gz")).unwrap();
        assert_eq!((adm2.len(), adm1.len(), adm0.len()), (5, 2, 1));
        let level1 = AdminLevel::new(1).unwrap();
        assert!(verify_hierarchy(&adm2, &adm1, level1).unwrap().is_empty());
        assert!(verify_hierarchy(&adm1, &adm0, AdminLevel::COUNTRY).unwrap().is_empty());
        assert_eq!(
            adm0.value(&adm0.features()[0], "adm0_name"),
            Some(&Value::from("Testland"))
        );
        assert_eq!(
            adm0.value(&adm0.features()[0], "adm0_pcode"),
            Some(&Value::from("TS"))
        );

        let extended = read_layer(
            &ctx.config
                .area_dir(StageArea::Extended)
                .join("tst_adm2.json.gz"),
        )
        .unwrap();
        assert_eq!(extended.len(), 5);
        assert_eq!(extended.columns()[..2], ["adm2_name".to_string(), "adm2_pcode".to_string()]);
        assert!(!extended.has_column("survey"));
        let far_east = &extended.features()[4];
        assert_eq!(extended.value(far_east, "adm2_pcode"), Some(&Value::from("TS0203")));
        assert!(extended.value(far_east, "validto").unwrap().is_null());
        let area = |g: &Geometry<f64>| g.unsigned_area();
        assert!((area(&far_east.geometry) - 2.0).abs() < 1e-6);

        let kashmir = read_layer(
            &ctx.config
                .area_dir(StageArea::Aggregated)
                .join("xik_adm1.json.gz"),
        )
        .unwrap();
        let names: Vec<Option<&str>> = kashmir
            .features()
            .iter()
            .map(|f| kashmir.value(f, "adm1_name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec![Some("Reviewed West"), Some("Reviewed East")]);

        let kashmir0 = read_layer(&edge_matched.join("xik_adm0.json.gz")).unwrap();
        assert_eq!(kashmir0.len(), 1);
        let outline: MultiPolygon<f64> = match &kashmir0.features()[0].geometry {
            Geometry::MultiPolygon(mp) => mp.clone(),
            other => panic!("unexpected geometry {:?}", other),
        };
        assert!((outline.unsigned_area() - 2.0).abs() < 1e-9);

        let lines = read_layer(
            &ctx.config
                .area_dir(StageArea::EdgeMatchedLines)
                .join("tst.json.gz"),
        )
        .unwrap();
        let keys: HashSet<(Option<i64>, Option<String>)> = lines
            .features()
            .iter()
            .map(|f| (f.properties[0].as_i64(), f.properties[1].key()))
            .collect();
        assert_eq!(keys.len(), lines.len());
        let tst = Some("TST".to_string());
        assert!(keys.contains(&(Some(1), tst.clone())));
        assert!(keys.contains(&(Some(11), tst.clone())));
        assert!(keys.contains(&(Some(12), tst.clone())));
        assert!(!keys.contains(&(Some(6), tst)));
        assert!(keys.iter().all(|(_, code)| code.as_deref() == Some("TST")));

        let kashmir_lines = read_layer(
            &ctx.config
                .area_dir(StageArea::EdgeMatchedLines)
                .join("xik.json.gz"),
        )
        .unwrap();
        assert_eq!(kashmir_lines.len(), 1);
        assert_eq!(kashmir_lines.features()[0].properties[0].as_i64(), Some(11));
    }

    #[test]
    fn test_rerun_is_stable() {
        let dir = TempDir::new().unwrap();
        let ctx = PipelineContext::load(workspace(dir.path())).unwrap();
        ctx.run(&Stage::ALL).unwrap();
        let path = ctx.config.area_dir(StageArea::Aggregated).join("tst_adm1.json.gz");
        let first = read_layer(&path).unwrap();
        let reports = ctx.run(&[Stage::Aggregate]).unwrap();
        assert!(!reports[0].has_failures());
        let second = read_layer(&path).unwrap();
        assert_eq!(first.columns(), second.columns());
        assert_eq!(first.len(), second.len());
    }
}
