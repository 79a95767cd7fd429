use crate::audit::AuditLog;
use crate::error::{ErrorKind, Outcome};
use crate::homologate::{Field, Homologated};
use crate::models::{cell, parse_number, Table};

/// Registry columns a complete business listing shows.
pub const DISPLAY_COLUMNS: &[&str] = &[
    "nombre",
    "giro",
    "latitude",
    "longitude",
    "direccion",
    "correo_electronico",
];

#[derive(Debug, Clone, PartialEq)]
pub struct TerritorialView {
    pub municipality: String,
    pub businesses: Table,
    pub census: Table,
    pub missing_columns: Vec<&'static str>,
    pub coordinates: Vec<(f64, f64)>,
}

impl TerritorialView {
    pub fn download_name(&self) -> String {
        download_file_name(&self.municipality)
    }

    /// Registry rows restricted to the display columns that exist.
    pub fn listing(&self) -> Table {
        self.businesses.select(DISPLAY_COLUMNS)
    }

    pub fn businesses_csv(&self) -> Result<Vec<u8>, csv::Error> {
        self.businesses.to_csv_bytes()
    }
}

pub fn download_file_name(municipality: &str) -> String {
    format!("empresas_{}.csv", municipality.trim().replace(['/', '\\'], "_"))
}

/// Municipalities that can be selected: those present in the registry.
pub fn municipalities(registry: &Homologated) -> Vec<String> {
    registry
        .column(Field::Municipality)
        .map(|c| registry.table.distinct_values(c))
        .unwrap_or_default()
}

fn rows_for(data: &Homologated, wanted: &str) -> Table {
    let Some(idx) = data
        .column(Field::Municipality)
        .and_then(|c| data.table.column_index(c))
    else {
        return Table::default();
    };
    data.table.filter(|row| {
        let value = cell(&row[idx]).map(|v| v.trim().to_uppercase());
        value.as_deref() == Some(wanted)
    })
}

pub fn municipality_view(
    registry: &Homologated,
    census: &Homologated,
    municipality: &str,
    audit: &mut AuditLog,
) -> Outcome<TerritorialView> {
    if registry.is_empty() || census.is_empty() {
        audit.warning("census or business registry unavailable for the territorial view");
        return Outcome::error(
            ErrorKind::SourceUnavailable,
            "census and business registry are both required",
        );
    }
    let joinable = registry.bindings.contains(Field::Municipality)
        && census.bindings.contains(Field::Municipality);
    if !joinable {
        audit.warning("municipality could not be homologated across census and registry");
        return Outcome::error(
            ErrorKind::SchemaMismatch,
            "municipality column missing in census or registry",
        );
    }

    let wanted = municipality.trim().to_uppercase();
    let businesses = rows_for(registry, &wanted);
    if businesses.is_empty() {
        audit.warning(format!("no registered businesses for municipality '{wanted}'"));
        return Outcome::error(
            ErrorKind::InvalidInput,
            format!("municipality '{wanted}' is not in the business registry"),
        );
    }
    let census_rows = rows_for(census, &wanted);

    let missing_columns: Vec<&'static str> = DISPLAY_COLUMNS
        .iter()
        .copied()
        .filter(|c| !businesses.has_column(c))
        .collect();
    if missing_columns.is_empty() {
        audit.success(format!("full business listing prepared for '{wanted}'"));
    } else {
        audit.warning(format!(
            "incomplete business listing for '{wanted}': missing {}",
            missing_columns.join(", ")
        ));
    }

    let coordinates: Vec<(f64, f64)> = match (
        businesses.column_index("latitude"),
        businesses.column_index("longitude"),
    ) {
        (Some(lat), Some(lon)) => businesses
            .rows()
            .iter()
            .filter_map(|row| {
                let lat = cell(&row[lat]).and_then(parse_number)?;
                let lon = cell(&row[lon]).and_then(parse_number)?;
                Some((lat, lon))
            })
            .collect(),
        _ => Vec::new(),
    };
    if coordinates.is_empty() {
        audit.info(format!("map omitted for '{wanted}': no coordinates"));
    } else {
        audit.success(format!(
            "map prepared for '{wanted}' ({} points)",
            coordinates.len()
        ));
    }

    audit.success(format!("download prepared: {}", download_file_name(&wanted)));
    Outcome::Ok(TerritorialView {
        municipality: wanted,
        businesses,
        census: census_rows,
        missing_columns,
        coordinates,
    })
}
