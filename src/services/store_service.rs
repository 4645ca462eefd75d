use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use shared::{AppError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

pub const HEADER: [&str; 6] = [
    "Estabelecimento",
    "Produto",
    "Quantidade",
    "Unidade",
    "Valor_Total",
    "Desconto",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const TOP_STORES: usize = 5;

/// One purchased item as written by the extraction job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRow {
    #[serde(rename = "Estabelecimento", default)]
    pub establishment: String,
    #[serde(rename = "Produto", default)]
    pub product: String,
    #[serde(rename = "Quantidade", default)]
    pub quantity: String,
    #[serde(rename = "Unidade", default)]
    pub unit: String,
    #[serde(rename = "Valor_Total", default)]
    pub total_value: String,
    #[serde(rename = "Desconto", default)]
    pub discount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptStats {
    pub total_items: usize,
    #[serde(serialize_with = "decimal_as_number")]
    pub total_value: Decimal,
    #[serde(serialize_with = "decimal_as_number")]
    pub total_discount: Decimal,
    /// Establishments with the most items, at most five.
    pub stores: Vec<StoreCount>,
}

impl Default for ReceiptStats {
    fn default() -> Self {
        Self {
            total_items: 0,
            total_value: Decimal::ZERO,
            total_discount: Decimal::ZERO,
            stores: Vec::new(),
        }
    }
}

fn decimal_as_number<S: Serializer>(value: &Decimal, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.to_f64().unwrap_or_default())
}

/// Parses Brazilian formatted amounts (`1.234,56`). Blank or malformed
/// values yield `None`.
pub fn parse_brl(raw: &str) -> Option<Decimal> {
    let normalized = raw.trim().replace('.', "").replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

/// Read side of the shared `;`-separated receipt CSV.
///
/// The extraction job appends rows; this type only creates the file, reads it
/// and resets it.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    path: PathBuf,
}

impl ReceiptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the file with a BOM and the header row if it is missing.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.write_header()?;
        info!("📄 Receipt store initialized at {}", self.path.display());
        Ok(())
    }

    /// All data rows. A missing file reads as empty.
    pub fn rows(&self) -> Result<Vec<ReceiptRow>> {
        let Some(bytes) = self.read_raw()? else {
            return Ok(Vec::new());
        };
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_reader(body);

        let mut rows = Vec::new();
        for record in reader.deserialize::<ReceiptRow>() {
            let row = record.map_err(|e| AppError::store(format!("malformed receipt row: {}", e)))?;
            rows.push(row);
        }
        debug!("Read {} receipt row(s)", rows.len());
        Ok(rows)
    }

    pub fn stats(&self) -> Result<ReceiptStats> {
        Ok(compute_stats(&self.rows()?))
    }

    /// Drops every row, leaving a fresh header-only file.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        self.write_header()?;
        info!("🧹 Receipt store cleared");
        Ok(())
    }

    /// File contents as stored, `None` when there is no file yet.
    pub fn read_raw(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_header(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&self.path)?;
        file.write_all(UTF8_BOM)?;

        let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(file);
        writer
            .write_record(HEADER)
            .map_err(|e| AppError::store(format!("cannot write header: {}", e)))?;
        writer.flush()?;
        Ok(())
    }
}

pub fn compute_stats(rows: &[ReceiptRow]) -> ReceiptStats {
    let mut total_value = Decimal::ZERO;
    let mut total_discount = Decimal::ZERO;
    let mut per_store: HashMap<&str, usize> = HashMap::new();

    for row in rows {
        if let Some(value) = parse_brl(&row.total_value) {
            total_value += value;
        }
        // Discounts are stored negative ("-0,50"); totals are reported positive.
        if let Some(discount) = parse_brl(&row.discount.replace('-', "")) {
            total_discount += discount;
        }
        let store = if row.establishment.trim().is_empty() {
            "Unidentified"
        } else {
            row.establishment.as_str()
        };
        *per_store.entry(store).or_insert(0) += 1;
    }

    let mut stores: Vec<StoreCount> = per_store
        .into_iter()
        .map(|(name, count)| StoreCount {
            name: name.to_string(),
            count,
        })
        .collect();
    stores.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    stores.truncate(TOP_STORES);

    ReceiptStats {
        total_items: rows.len(),
        total_value: total_value.round_dp(2),
        total_discount: total_discount.round_dp(2),
        stores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> ReceiptStore {
        ReceiptStore::new(std::env::temp_dir().join(format!("nfce-store-{}.csv", uuid::Uuid::new_v4())))
    }

    fn append(store: &ReceiptStore, lines: &[&str]) {
        let mut file = fs::OpenOptions::new().append(true).open(store.path()).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn dec(v: &str) -> Decimal {
        Decimal::from_str(v).unwrap()
    }

    #[test]
    fn test_parse_brl() {
        assert_eq!(parse_brl("1.234,56"), Some(dec("1234.56")));
        assert_eq!(parse_brl(" 7,90 "), Some(dec("7.90")));
        assert_eq!(parse_brl(""), None);
        assert_eq!(parse_brl("abc"), None);
    }

    #[test]
    fn test_initialize_writes_bom_and_header() {
        let store = temp_store();
        assert!(store.read_raw().unwrap().is_none());

        store.ensure_initialized().unwrap();
        let raw = store.read_raw().unwrap().unwrap();
        assert!(raw.starts_with(UTF8_BOM));
        let text = String::from_utf8(raw[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text.trim_end(), "Estabelecimento;Produto;Quantidade;Unidade;Valor_Total;Desconto");
        assert!(store.rows().unwrap().is_empty());

        fs::remove_file(store.path()).ok();
    }

    #[test]
    fn test_initialize_keeps_existing_rows() {
        let store = temp_store();
        store.ensure_initialized().unwrap();
        append(&store, &["Mercado A;Arroz;1;UN;10,00;"]);

        store.ensure_initialized().unwrap();
        assert_eq!(store.rows().unwrap().len(), 1);

        fs::remove_file(store.path()).ok();
    }

    #[test]
    fn test_rows_and_stats() {
        let store = temp_store();
        store.ensure_initialized().unwrap();
        append(
            &store,
            &[
                "Mercado A;Arroz 5kg;1;UN;1.234,56;-0,50",
                "Mercado A;Feijão;2;UN;15,80;",
                "Padaria B;Pão;6;UN;4,20;-1,00",
                "Mercado A;Leite;1;L;invalid;",
            ],
        );

        let rows = store.rows().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].product, "Feijão");
        assert_eq!(rows[2].unit, "UN");

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.total_value, dec("1254.56"));
        assert_eq!(stats.total_discount, dec("1.50"));
        assert_eq!(
            stats.stores,
            vec![
                StoreCount { name: "Mercado A".to_string(), count: 3 },
                StoreCount { name: "Padaria B".to_string(), count: 1 },
            ]
        );

        fs::remove_file(store.path()).ok();
    }

    #[test]
    fn test_stats_without_file() {
        let store = temp_store();
        let stats = store.stats().unwrap();
        assert_eq!(stats, ReceiptStats::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_value"], serde_json::json!(0.0));
    }

    #[test]
    fn test_top_five_stores() {
        let rows: Vec<ReceiptRow> = (0..7)
            .flat_map(|i| {
                (0..=i).map(move |_| ReceiptRow {
                    establishment: format!("Store {}", i),
                    ..ReceiptRow::default()
                })
            })
            .collect();
        let stats = compute_stats(&rows);
        assert_eq!(stats.stores.len(), 5);
        assert_eq!(stats.stores[0].name, "Store 6");
        assert_eq!(stats.stores[0].count, 7);
        assert_eq!(stats.stores[4].name, "Store 2");
    }

    #[test]
    fn test_clear_resets_to_header() {
        let store = temp_store();
        store.ensure_initialized().unwrap();
        append(&store, &["Mercado A;Arroz;1;UN;10,00;"]);

        store.clear().unwrap();
        assert!(store.exists());
        assert!(store.rows().unwrap().is_empty());

        fs::remove_file(store.path()).ok();
    }
}
