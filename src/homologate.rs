//! Column and value homologation.
//!
//! Source files name the same concept differently (`producto` vs `product`,
//! `latitud` vs `latitude`) and spell categories inconsistently (`AUTO`,
//! `Autos particular`). Each domain declares, per logical field, the
//! acceptable physical names in priority order; the first one present wins
//! and is renamed to the canonical name unless that name is already taken.
//! Fields that cannot be resolved stay unbound and every consumer degrades.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::audit::AuditLog;
use crate::error::Outcome;
use crate::models::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Insurer,
    Product,
    Line,
    SubLine,
    PolicyNumber,
    CustomerId,
    ContractorName,
    Premium,
    StartDate,
    EndDate,
    BirthDate,
    History,
    BusinessName,
    Activity,
    Latitude,
    Longitude,
    Address,
    Email,
    Municipality,
    SaleDate,
    InsurerName,
    SalesAmount,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::Insurer => "insurer",
            Field::Product => "product",
            Field::Line => "insurance line",
            Field::SubLine => "insurance sub-line",
            Field::PolicyNumber => "policy number",
            Field::CustomerId => "customer id",
            Field::ContractorName => "contractor name",
            Field::Premium => "premium",
            Field::StartDate => "start date",
            Field::EndDate => "end date",
            Field::BirthDate => "birth date",
            Field::History => "history",
            Field::BusinessName => "business name",
            Field::Activity => "activity",
            Field::Latitude => "latitude",
            Field::Longitude => "longitude",
            Field::Address => "address",
            Field::Email => "email",
            Field::Municipality => "municipality",
            Field::SaleDate => "sale date",
            Field::InsurerName => "insurer name",
            Field::SalesAmount => "sales amount",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    PolicyBase,
    BusinessRegistry,
    Sales,
    Census,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Domain::PolicyBase => "policy base",
            Domain::BusinessRegistry => "business registry",
            Domain::Sales => "sales",
            Domain::Census => "census",
        };
        f.write_str(label)
    }
}

/// Acceptable physical names for one logical field, highest priority first.
#[derive(Debug, Clone, Copy)]
pub struct Synonyms {
    pub field: Field,
    pub canonical: &'static str,
    pub candidates: &'static [&'static str],
}

const fn syn(
    field: Field,
    canonical: &'static str,
    candidates: &'static [&'static str],
) -> Synonyms {
    Synonyms {
        field,
        canonical,
        candidates,
    }
}

const POLICY_SYNONYMS: &[Synonyms] = &[
    syn(Field::Insurer, "source", &["source", "aseguradora"]),
    syn(
        Field::Product,
        "product",
        &["product", "producto", "nombre_producto", "tipo_producto"],
    ),
    syn(Field::Line, "Ramo", &["Ramo", "ramo"]),
    syn(Field::SubLine, "Subramo", &["Subramo", "subramo"]),
    syn(Field::PolicyNumber, "policy_number", &["policy_number", "numero_poliza"]),
    syn(Field::CustomerId, "id_cliente", &["id_cliente"]),
    syn(Field::ContractorName, "contractor_name", &["contractor_name", "contratante"]),
    syn(Field::Premium, "premium_mxn", &["premium_mxn", "prima_mxn"]),
    syn(Field::StartDate, "start_date", &["start_date"]),
    syn(Field::EndDate, "end_date", &["end_date"]),
    syn(Field::BirthDate, "birth_date", &["birth_date"]),
    syn(Field::History, "historial", &["historial", "history"]),
];

const REGISTRY_SYNONYMS: &[Synonyms] = &[
    syn(Field::BusinessName, "nombre", &["nombre", "nombre_empresa"]),
    syn(
        Field::Activity,
        "giro",
        &[
            "giro",
            "actividad",
            "rama",
            "Código de la clase de actividad SCIAN",
        ],
    ),
    syn(Field::Latitude, "latitude", &["latitude", "latitud"]),
    syn(Field::Longitude, "longitude", &["longitude", "longitud"]),
    syn(Field::Address, "direccion", &["direccion", "domicilio", "direccion_empresa"]),
    syn(Field::Email, "correo_electronico", &["correo_electronico", "correo", "email"]),
    syn(Field::Municipality, "municipio", &["municipio"]),
];

const SALES_SYNONYMS: &[Synonyms] = &[
    syn(Field::SaleDate, "fecha", &["fecha"]),
    syn(Field::Line, "Ramo", &["Ramo", "ramo", "tipo_ramo", "segmento_ramo"]),
    syn(Field::InsurerName, "nombre", &["nombre"]),
    syn(Field::SalesAmount, "Ventas", &["Ventas", "ventas"]),
];

const CENSUS_SYNONYMS: &[Synonyms] = &[syn(
    Field::Municipality,
    "municipio",
    &["municipio", "nombre_municipio", "nom_mun", "localidad"],
)];

impl Domain {
    pub fn synonyms(self) -> &'static [Synonyms] {
        match self {
            Domain::PolicyBase => POLICY_SYNONYMS,
            Domain::BusinessRegistry => REGISTRY_SYNONYMS,
            Domain::Sales => SALES_SYNONYMS,
            Domain::Census => CENSUS_SYNONYMS,
        }
    }
}

pub type NormalizationMap = &'static [(&'static str, &'static str)];

pub const LINE_MAP: NormalizationMap = &[
    ("AUTO", "AUTOS"),
    ("AUTOS PARTICULAR", "AUTOS"),
    ("CAMIONES", "AUTOS"),
    ("BENEFICIOS", "BENEFICIOS"),
    ("DAÑOS", "DAÑOS"),
    ("GMM", "GMM"),
    ("HOGAR", "HOGAR"),
    ("PMM", "PMM"),
    ("SALUD", "SALUD"),
    ("VDA", "VIDA"),
    ("VIDA", "VIDA"),
];

pub const SUBLINE_MAP: NormalizationMap = &[
    ("ACCIDENTES", "ACCIDENTES"),
    ("AUTOS PARTICULAR", "AUTOS"),
    ("CAMIONES", "AUTOS"),
    ("GMM INDIVIDUAL / FAMILIA", "GMM"),
    ("GERENTE GENERAL", "GERENCIA"),
    ("RC", "RESPONSABILIDAD CIVIL"),
    ("RESPONSABILIDAD CIVIL", "RESPONSABILIDAD CIVIL"),
    ("HOGAR", "HOGAR"),
    ("YAYA", "YAYA"),
    ("EDUCATIVO", "EDUCATIVO"),
    ("EMPRESARIAL", "EMPRESARIAL"),
    ("SALUD", "SALUD"),
    ("VIDA", "VIDA"),
];

#[derive(Debug, Clone, Copy)]
enum ValueRule {
    Keep,
    Upper,
    Canonical(NormalizationMap),
    Date,
}

fn value_rule(domain: Domain, field: Field) -> ValueRule {
    match (domain, field) {
        (Domain::PolicyBase, Field::Line) => ValueRule::Canonical(LINE_MAP),
        (Domain::PolicyBase, Field::SubLine) => ValueRule::Canonical(SUBLINE_MAP),
        (Domain::PolicyBase, Field::StartDate | Field::EndDate | Field::BirthDate) => {
            ValueRule::Date
        }
        (_, Field::Product | Field::Line | Field::Municipality | Field::Activity) => {
            ValueRule::Upper
        }
        _ => ValueRule::Keep,
    }
}

/// Physical column backing `field`, scanning its candidates in declared
/// order. `None` when the field is not part of `map` or no candidate exists.
pub fn resolve_column(table: &Table, field: Field, map: &[Synonyms]) -> Option<String> {
    map.iter()
        .find(|s| s.field == field)?
        .candidates
        .iter()
        .find(|c| table.has_column(c))
        .map(|c| c.to_string())
}

fn lookup(map: NormalizationMap, key: &str) -> Option<&'static str> {
    map.iter().find(|(raw, _)| *raw == key).map(|(_, canonical)| *canonical)
}

/// Trims and upper-cases `raw`, then swaps it for its canonical value when
/// it is a key of `map`.
pub fn normalize_value(raw: &str, map: NormalizationMap) -> String {
    let key = raw.trim().to_uppercase();
    match lookup(map, &key) {
        Some(canonical) => canonical.to_string(),
        None => key,
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Lenient date coercion. Slash dates are read day-first.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Logical field → physical column for one homologated dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings(BTreeMap<Field, String>);

impl Bindings {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    fn bind(&mut self, field: Field, column: String) {
        self.0.insert(field, column);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Homologated {
    pub table: Table,
    pub bindings: Bindings,
}

impl Homologated {
    pub fn column(&self, field: Field) -> Option<&str> {
        self.bindings.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Same bindings over a row subset.
    pub fn with_table(&self, table: Table) -> Homologated {
        Homologated {
            table,
            bindings: self.bindings.clone(),
        }
    }
}

pub fn homologate(table: Table, domain: Domain, audit: &mut AuditLog) -> Outcome<Homologated> {
    if table.is_empty() {
        audit.warning(format!("{domain} has no records; homologation skipped"));
        return Outcome::Empty(format!("{domain} has no records"));
    }

    let mut table = table;
    let mut bindings = Bindings::default();
    let map = domain.synonyms();

    for entry in map {
        let label = entry.field.label();
        let Some(physical) = resolve_column(&table, entry.field, map) else {
            audit.warning(format!(
                "{label} column not found in {domain} (tried {}); dependent views report N/D",
                entry.candidates.join(", ")
            ));
            continue;
        };

        let renamed =
            physical != entry.canonical && table.rename_column(&physical, entry.canonical);
        let column = if renamed {
            audit.success(format!(
                "{domain}: column '{physical}' renamed to '{}' for {label}",
                entry.canonical
            ));
            entry.canonical.to_string()
        } else {
            audit.success(format!("{domain}: column '{physical}' bound to {label}"));
            physical
        };

        apply_value_rule(&mut table, &column, value_rule(domain, entry.field), audit);
        bindings.bind(entry.field, column);
    }

    Outcome::Ok(Homologated { table, bindings })
}

fn apply_value_rule(table: &mut Table, column: &str, rule: ValueRule, audit: &mut AuditLog) {
    match rule {
        ValueRule::Keep => {}
        ValueRule::Upper => {
            table.map_column(column, |v| Some(v.trim().to_uppercase()));
            audit.success(format!("values of '{column}' trimmed and upper-cased"));
        }
        ValueRule::Canonical(map) => {
            let rewritten: BTreeSet<(String, &'static str)> = table
                .values(column)
                .filter_map(|v| {
                    let key = v.trim().to_uppercase();
                    lookup(map, &key)
                        .filter(|canonical| *canonical != key)
                        .map(|canonical| (key, canonical))
                })
                .collect();
            table.map_column(column, |v| Some(normalize_value(v, map)));
            audit.success(format!("values of '{column}' homologated"));
            for (raw, canonical) in rewritten {
                audit.info(format!("'{column}' value '{raw}' homologated to '{canonical}'"));
            }
        }
        ValueRule::Date => {
            let mut cleared = 0usize;
            table.map_column(column, |v| match parse_date(v) {
                Some(date) => Some(date.format("%Y-%m-%d").to_string()),
                None => {
                    cleared += 1;
                    None
                }
            });
            audit.success(format!(
                "column '{column}' normalized to ISO dates ({cleared} unparseable values cleared)"
            ));
        }
    }
}

pub const REQUIRED_POLICY_FIELDS: &[Field] = &[
    Field::PolicyNumber,
    Field::CustomerId,
    Field::Product,
    Field::Line,
    Field::SubLine,
    Field::Premium,
];

/// Structural check of the policy base. Appends one entry per required
/// column and returns the canonical names of the missing ones.
pub fn validate_required_columns(
    policies: &Homologated,
    audit: &mut AuditLog,
) -> Vec<&'static str> {
    let mut missing = Vec::new();
    for field in REQUIRED_POLICY_FIELDS {
        let canonical = POLICY_SYNONYMS
            .iter()
            .find(|s| s.field == *field)
            .map(|s| s.canonical)
            .unwrap_or_else(|| field.label());
        match policies.column(*field) {
            Some(column) if policies.table.has_column(column) => {
                audit.success(format!("required column present: '{column}'"));
            }
            _ => {
                audit.failure(format!("required column missing: '{canonical}'"));
                missing.push(canonical);
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLevel;

    fn table(csv: &str) -> Table {
        Table::from_bytes(csv.as_bytes()).unwrap()
    }

    fn run(csv: &str, domain: Domain) -> (Homologated, AuditLog) {
        let mut audit = AuditLog::new();
        let result = homologate(table(csv), domain, &mut audit)
            .ok()
            .expect("homologation should succeed");
        (result, audit)
    }

    #[test]
    fn synonym_is_renamed_to_canonical_name() {
        let (h, audit) = run("id_cliente,producto\nC1,gmm\n", Domain::PolicyBase);
        assert_eq!(h.column(Field::Product), Some("product"));
        assert!(h.table.has_column("product"));
        assert_eq!(h.table.values("product").collect::<Vec<_>>(), vec!["GMM"]);
        assert!(audit
            .entries()
            .iter()
            .any(|e| e.message.contains("'producto' renamed to 'product'")));
    }

    #[test]
    fn first_candidate_wins() {
        let (h, _) = run("aseguradora,source\nGNP,AXA\n", Domain::PolicyBase);
        assert_eq!(h.column(Field::Insurer), Some("source"));
        assert!(h.table.has_column("aseguradora"));
    }

    #[test]
    fn unresolved_field_warns_and_stays_unbound() {
        let (h, audit) = run("id_cliente\nC1\n", Domain::PolicyBase);
        assert!(!h.bindings.contains(Field::Product));
        assert!(!h.bindings.contains(Field::Premium));
        assert!(audit.entries().iter().any(|e| e.level == AuditLevel::Warning
            && e.message.starts_with("product column not found")));
    }

    #[test]
    fn resolve_column_follows_declared_order() {
        let t = table("tipo_producto,nombre_producto\nA,B\n");
        assert_eq!(
            resolve_column(&t, Field::Product, POLICY_SYNONYMS).as_deref(),
            Some("nombre_producto")
        );
        assert_eq!(resolve_column(&t, Field::Municipality, POLICY_SYNONYMS), None);
    }

    #[test]
    fn normalize_value_maps_keys_and_passes_others() {
        assert_eq!(normalize_value(" auto ", LINE_MAP), "AUTOS");
        assert_eq!(normalize_value("Vda", LINE_MAP), "VIDA");
        assert_eq!(normalize_value("motos", LINE_MAP), "MOTOS");
        assert_eq!(normalize_value("rc", SUBLINE_MAP), "RESPONSABILIDAD CIVIL");
        for (key, canonical) in LINE_MAP {
            assert_eq!(normalize_value(key, LINE_MAP), *canonical);
        }
    }

    #[test]
    fn line_values_are_homologated_with_audit_trail() {
        let (h, audit) = run(
            "Ramo,Subramo\nauto,camiones\nVIDA,rc\nCamiones,\n",
            Domain::PolicyBase,
        );
        assert_eq!(
            h.table.values("Ramo").collect::<Vec<_>>(),
            vec!["AUTOS", "VIDA", "AUTOS"]
        );
        assert_eq!(
            h.table.values("Subramo").collect::<Vec<_>>(),
            vec!["AUTOS", "RESPONSABILIDAD CIVIL"]
        );
        let rewrites: Vec<&str> = audit
            .entries()
            .iter()
            .filter(|e| e.message.starts_with("'Ramo' value"))
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(
            rewrites,
            vec![
                "'Ramo' value 'AUTO' homologated to 'AUTOS'",
                "'Ramo' value 'CAMIONES' homologated to 'AUTOS'",
            ]
        );
    }

    #[test]
    fn policy_dates_are_coerced() {
        let (h, audit) = run(
            "id_cliente,end_date\nC1,2024-01-15\nC1,15/02/2024\nC1,pronto\n",
            Domain::PolicyBase,
        );
        assert_eq!(
            h.table.values("end_date").collect::<Vec<_>>(),
            vec!["2024-01-15", "2024-02-15"]
        );
        assert!(audit
            .entries()
            .iter()
            .any(|e| e.message.contains("(1 unparseable values cleared)")));
    }

    #[test]
    fn parse_date_accepts_common_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9);
        assert_eq!(parse_date("2024-03-09"), expected);
        assert_eq!(parse_date("09/03/2024"), expected);
        assert_eq!(parse_date("2024-03-09 13:45:00"), expected);
        assert_eq!(parse_date("2024-03-09T13:45:00-06:00"), expected);
        assert_eq!(parse_date("2024-13-40"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn registry_columns_are_renamed() {
        let (h, _) = run(
            "nombre_empresa,actividad,latitud,longitud,domicilio,correo,municipio\n\
             Taller Ruiz,reparación,19.28,-99.65,Av. Juárez 1,t@r.mx,toluca\n",
            Domain::BusinessRegistry,
        );
        for column in [
            "nombre",
            "giro",
            "latitude",
            "longitude",
            "direccion",
            "correo_electronico",
            "municipio",
        ] {
            assert!(h.table.has_column(column), "missing {column}");
        }
        assert_eq!(h.table.values("giro").collect::<Vec<_>>(), vec!["REPARACIÓN"]);
        assert_eq!(h.table.values("municipio").collect::<Vec<_>>(), vec!["TOLUCA"]);
    }

    #[test]
    fn existing_canonical_column_is_not_clobbered() {
        let (h, _) = run(
            "email,correo_electronico\na@b.mx,c@d.mx\n",
            Domain::BusinessRegistry,
        );
        assert_eq!(h.column(Field::Email), Some("correo_electronico"));
        assert!(h.table.has_column("email"));
    }

    #[test]
    fn census_municipality_synonym() {
        let (h, _) = run("nom_mun,poblacion\nMetepec,242307\n", Domain::Census);
        assert_eq!(h.column(Field::Municipality), Some("municipio"));
        assert_eq!(h.table.values("municipio").collect::<Vec<_>>(), vec!["METEPEC"]);
    }

    #[test]
    fn empty_table_is_empty_outcome() {
        let mut audit = AuditLog::new();
        let outcome = homologate(table("fecha,Ventas\n"), Domain::Sales, &mut audit);
        assert!(matches!(outcome, Outcome::Empty(_)));
        assert_eq!(audit.count(AuditLevel::Warning), 1);
    }

    #[test]
    fn validation_lists_missing_required_columns() {
        let (h, _) = run("policy_number,id_cliente,producto\nP1,C1,GMM\n", Domain::PolicyBase);
        let mut audit = AuditLog::new();
        let missing = validate_required_columns(&h, &mut audit);
        assert_eq!(missing, vec!["Ramo", "Subramo", "premium_mxn"]);
        assert_eq!(audit.count(AuditLevel::Success), 3);
        assert_eq!(audit.count(AuditLevel::Failure), 3);
    }
}
