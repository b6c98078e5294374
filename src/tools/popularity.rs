//! Popularity data from the baby-names CSV
//!
//! The CSV is parsed once per process into a per-name year series with ranks
//! recomputed per year from counts. The cache is clearable for tests.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;

/// Popularity data for a single year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearData {
    pub year: i32,
    pub rank: u32,
    pub count: i64,
}

/// Result of a popularity query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopularityResult {
    pub timeseries: Option<Vec<YearData>>,
    pub notes: String,
}

type Index = HashMap<String, BTreeMap<i32, YearData>>;

fn cache() -> &'static Mutex<Option<Arc<Index>>> {
    static CACHE: OnceLock<Mutex<Option<Arc<Index>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(None))
}

fn csv_path() -> PathBuf {
    if let Ok(data_dir) = env::var("DATA_DIR") {
        if !data_dir.is_empty() {
            return Path::new(&data_dir).join("baby-names.csv");
        }
    }
    PathBuf::from("data").join("baby-names.csv")
}

/// Parse the CSV into the per-name index. Missing or malformed files yield
/// an empty index; individual bad rows are skipped.
fn build_index(path: &Path) -> Index {
    let mut index: Index = HashMap::new();

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return index,
    };

    let mut lines = content.lines();
    let header = match lines.next() {
        Some(h) => h,
        None => return index,
    };

    let columns: Vec<&str> = header.split(',').map(|c| c.trim().trim_matches('"')).collect();
    let year_col = columns.iter().position(|c| *c == "year");
    let name_col = columns.iter().position(|c| *c == "name");
    let percent_col = columns.iter().position(|c| *c == "percent");
    let (year_col, name_col, percent_col) = match (year_col, name_col, percent_col) {
        (Some(y), Some(n), Some(p)) => (y, n, p),
        _ => return index,
    };

    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        let year = fields.get(year_col).and_then(|f| f.trim().parse::<i32>().ok());
        let name = fields
            .get(name_col)
            .map(|f| f.trim().replace('"', ""))
            .filter(|n| !n.is_empty());
        let percent = fields
            .get(percent_col)
            .and_then(|f| f.trim().parse::<f64>().ok());

        if let (Some(year), Some(name), Some(percent)) = (year, name, percent) {
            // Approximate count from the percent column
            let count = (percent * 100_000.0) as i64;
            index
                .entry(name)
                .or_default()
                .insert(year, YearData { year, rank: 0, count });
        }
    }

    // Recompute ranks per year from counts
    let mut years: Vec<i32> = index
        .values()
        .flat_map(|series| series.keys().copied())
        .collect();
    years.sort_unstable();
    years.dedup();

    for year in years {
        let mut entries: Vec<(String, i64)> = index
            .iter()
            .filter_map(|(name, series)| series.get(&year).map(|d| (name.clone(), d.count)))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (rank, (name, _)) in entries.into_iter().enumerate() {
            if let Some(data) = index.get_mut(&name).and_then(|s| s.get_mut(&year)) {
                data.rank = (rank + 1) as u32;
            }
        }
    }

    index
}

fn load_index() -> Arc<Index> {
    let mut cached = cache().lock().unwrap();
    if let Some(index) = cached.as_ref() {
        return Arc::clone(index);
    }
    let index = Arc::new(build_index(&csv_path()));
    *cached = Some(Arc::clone(&index));
    index
}

/// Clear the popularity cache so the next query re-reads the CSV.
pub fn clear_cache() {
    *cache().lock().unwrap() = None;
}

/// Look up popularity data for a name. Only US data is available.
pub fn get_popularity(name: &str, region: &str) -> PopularityResult {
    if region != "US" {
        return PopularityResult {
            timeseries: None,
            notes: "Popularity data is only available for the US.".to_string(),
        };
    }

    let index = load_index();
    match index.get(name) {
        None => PopularityResult {
            timeseries: None,
            notes: "No popularity data found for this name.".to_string(),
        },
        Some(series) => PopularityResult {
            timeseries: Some(series.values().copied().collect()),
            notes: "Popularity data is based on the top 1000 names from 1880 to 2009.".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baby-names.csv");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_build_index_ranks_by_count_within_year() {
        let (_dir, path) = write_csv(
            "year,name,percent,sex\n\
             1990,\"Emma\",0.02,girl\n\
             1990,\"Iris\",0.005,girl\n\
             1991,\"Iris\",0.007,girl\n",
        );
        let index = build_index(&path);

        let emma = &index["Emma"][&1990];
        assert_eq!(emma.count, 2000);
        assert_eq!(emma.rank, 1);

        let iris_1990 = &index["Iris"][&1990];
        assert_eq!(iris_1990.rank, 2);

        // Sole entry for 1991 ranks first
        assert_eq!(index["Iris"][&1991].rank, 1);
    }

    #[test]
    fn test_build_index_skips_malformed_rows() {
        let (_dir, path) = write_csv(
            "year,name,percent\n\
             not-a-year,Emma,0.02\n\
             1990,,0.02\n\
             1990,Iris,not-a-number\n\
             1990,Wren,0.001\n",
        );
        let index = build_index(&path);
        assert_eq!(index.len(), 1);
        assert!(index.contains_key("Wren"));
    }

    #[test]
    fn test_build_index_missing_file_is_empty() {
        let index = build_index(Path::new("/nonexistent/baby-names.csv"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_timeseries_is_year_ordered() {
        let (_dir, path) = write_csv(
            "year,name,percent\n\
             1992,Iris,0.003\n\
             1990,Iris,0.001\n\
             1991,Iris,0.002\n",
        );
        let index = build_index(&path);
        let years: Vec<i32> = index["Iris"].values().map(|d| d.year).collect();
        assert_eq!(years, [1990, 1991, 1992]);
    }

    #[test]
    fn test_non_us_region_returns_notes_only() {
        let result = get_popularity("Iris", "DE");
        assert!(result.timeseries.is_none());
        assert!(result.notes.contains("only available for the US"));
    }
}
