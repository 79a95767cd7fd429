//! Demonstration-grade customer clustering.
//!
//! Customer id and contractor name are categorical; each is encoded as the
//! rank of the value among the sorted distinct values, so codes (and the
//! resulting clusters) do not depend on row order. The encoding carries no
//! notion of similarity between customers.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::audit::AuditLog;
use crate::error::{ErrorKind, Outcome};
use crate::homologate::{Field, Homologated};
use crate::models::{cell, Table};

pub const CLUSTER_COUNT: usize = 3;
pub const DOWNLOAD_NAME: &str = "clientes_clusterizados.csv";
const SEED: u64 = 42;
const MAX_ITERATIONS: usize = 300;

type Point = (f64, f64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    pub id_cliente: String,
    pub contractor_name: String,
    pub cluster: usize,
}

/// Segment label used by the promotion table: cluster 0 → "A", 1 → "B", …
pub fn segment_label(cluster: usize) -> String {
    match u8::try_from(cluster) {
        Ok(n) if n < 26 => char::from(b'A' + n).to_string(),
        _ => cluster.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub assignments: Vec<ClusterAssignment>,
    pub centroids: Vec<Point>,
}

impl Segmentation {
    /// (cluster, rows) for every cluster, in cluster order.
    pub fn counts(&self) -> Vec<(usize, usize)> {
        let mut counts = vec![0usize; self.centroids.len()];
        for a in &self.assignments {
            counts[a.cluster] += 1;
        }
        counts.into_iter().enumerate().collect()
    }

    pub fn to_table(&self) -> Table {
        let mut sorted: Vec<&ClusterAssignment> = self.assignments.iter().collect();
        sorted.sort_by_key(|a| a.cluster);
        Table::new(
            vec![
                "id_cliente".to_string(),
                "contractor_name".to_string(),
                "cluster".to_string(),
            ],
            sorted
                .into_iter()
                .map(|a| {
                    vec![
                        a.id_cliente.clone(),
                        a.contractor_name.clone(),
                        a.cluster.to_string(),
                    ]
                })
                .collect(),
        )
    }
}

fn distance2(a: Point, b: Point) -> f64 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}

fn nearest(point: Point, centroids: &[Point]) -> usize {
    let mut best = 0;
    for (i, c) in centroids.iter().enumerate().skip(1) {
        if distance2(point, *c) < distance2(point, centroids[best]) {
            best = i;
        }
    }
    best
}

fn weighted_pick(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().sum();
    let mut target = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(0)
}

/// Weighted Lloyd's k-means with k-means++ seeding. Labels are renumbered so
/// cluster 0 has the smallest centroid.
pub fn kmeans(
    points: &[Point],
    weights: &[f64],
    k: usize,
    seed: u64,
) -> (Vec<usize>, Vec<Point>) {
    if points.is_empty() || k == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let mut centroids = vec![points[weighted_pick(weights, &mut rng)]];
    while centroids.len() < k {
        let d2: Vec<f64> = points
            .iter()
            .zip(weights)
            .map(|(p, w)| w * distance2(*p, centroids[nearest(*p, &centroids)]))
            .collect();
        if d2.iter().sum::<f64>() <= 0.0 {
            break;
        }
        centroids.push(points[weighted_pick(&d2, &mut rng)]);
    }

    let mut labels: Vec<usize> = Vec::new();
    for _ in 0..MAX_ITERATIONS {
        let next: Vec<usize> = points.iter().map(|p| nearest(*p, &centroids)).collect();
        if next == labels {
            break;
        }
        labels = next;

        let mut sums = vec![(0.0, 0.0, 0.0); centroids.len()];
        for ((p, w), &label) in points.iter().zip(weights).zip(&labels) {
            sums[label].0 += p.0 * w;
            sums[label].1 += p.1 * w;
            sums[label].2 += w;
        }
        for (c, (sx, sy, sw)) in centroids.iter_mut().zip(sums) {
            if sw > 0.0 {
                *c = (sx / sw, sy / sw);
            }
        }
    }

    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_by(|a, b| {
        centroids[*a]
            .partial_cmp(&centroids[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut rank = vec![0usize; centroids.len()];
    for (new, old) in order.iter().enumerate() {
        rank[*old] = new;
    }

    (
        labels.into_iter().map(|l| rank[l]).collect(),
        order.into_iter().map(|i| centroids[i]).collect(),
    )
}

fn rank_codes<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<&'a str, usize> {
    values
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(code, value)| (value, code))
        .collect()
}

pub fn segment_customers(policies: &Homologated, audit: &mut AuditLog) -> Outcome<Segmentation> {
    let columns = (
        policies
            .column(Field::CustomerId)
            .and_then(|c| policies.table.column_index(c)),
        policies
            .column(Field::ContractorName)
            .and_then(|c| policies.table.column_index(c)),
    );
    let (Some(id_idx), Some(name_idx)) = columns else {
        audit.warning("clustering skipped: id_cliente or contractor_name missing");
        return Outcome::error(
            ErrorKind::SchemaMismatch,
            "clustering requires id_cliente and contractor_name",
        );
    };

    let pairs: Vec<(&str, &str)> = policies
        .table
        .rows()
        .iter()
        .filter_map(|row| Some((cell(&row[id_idx])?.trim(), cell(&row[name_idx])?.trim())))
        .collect();
    if pairs.is_empty() {
        audit.warning("clustering skipped: no rows with both customer id and contractor");
        return Outcome::Empty("no rows to cluster".to_string());
    }

    let id_codes = rank_codes(pairs.iter().map(|(id, _)| *id));
    let name_codes = rank_codes(pairs.iter().map(|(_, name)| *name));
    let encoded: Vec<(usize, usize)> = pairs
        .iter()
        .map(|(id, name)| (id_codes[id], name_codes[name]))
        .collect();

    let mut weights_by_point: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for point in &encoded {
        *weights_by_point.entry(*point).or_insert(0.0) += 1.0;
    }
    let distinct: Vec<(usize, usize)> = weights_by_point.keys().copied().collect();
    let points: Vec<Point> = distinct.iter().map(|(x, y)| (*x as f64, *y as f64)).collect();
    let weights: Vec<f64> = weights_by_point.values().copied().collect();

    let k = CLUSTER_COUNT.min(points.len());
    let (labels, centroids) = kmeans(&points, &weights, k, SEED);
    let label_of: BTreeMap<(usize, usize), usize> = distinct.into_iter().zip(labels).collect();

    let assignments: Vec<ClusterAssignment> = pairs
        .iter()
        .zip(&encoded)
        .map(|((id, name), point)| ClusterAssignment {
            id_cliente: id.to_string(),
            contractor_name: name.to_string(),
            cluster: label_of[point],
        })
        .collect();

    audit.success(format!(
        "clustering by customer and contractor completed ({} clusters, {} rows)",
        centroids.len(),
        assignments.len()
    ));
    Outcome::Ok(Segmentation {
        assignments,
        centroids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homologate::{homologate, Domain};

    fn policies(csv: &str) -> Homologated {
        let mut audit = AuditLog::new();
        homologate(Table::from_bytes(csv.as_bytes()).unwrap(), Domain::PolicyBase, &mut audit)
            .ok()
            .unwrap()
    }

    const ROWS: &[&str] = &[
        "C01,Ana Ruiz",
        "C02,Beto Sol",
        "C03,Carla Paz",
        "C04,Dora Luna",
        "C05,Eva Mar",
        "C06,Fer Rio",
        "C07,Gil Mora",
        "C01,Ana Ruiz",
    ];

    fn csv_of(rows: &[&str]) -> String {
        let mut csv = String::from("id_cliente,contractor_name\n");
        for row in rows {
            csv.push_str(row);
            csv.push('\n');
        }
        csv
    }

    #[test]
    fn separated_groups_get_their_own_clusters() {
        let points = vec![
            (0.0, 0.0),
            (0.0, 1.0),
            (100.0, 100.0),
            (100.0, 101.0),
            (200.0, 0.0),
            (201.0, 0.0),
        ];
        let weights = vec![1.0; points.len()];
        let (labels, centroids) = kmeans(&points, &weights, 3, SEED);
        assert_eq!(labels, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(centroids[0], (0.0, 0.5));
    }

    #[test]
    fn every_row_gets_one_of_three_clusters() {
        let mut audit = AuditLog::new();
        let seg = segment_customers(&policies(&csv_of(ROWS)), &mut audit)
            .ok()
            .unwrap();
        assert_eq!(seg.assignments.len(), ROWS.len());
        assert_eq!(seg.centroids.len(), CLUSTER_COUNT);
        assert!(seg.assignments.iter().all(|a| a.cluster < CLUSTER_COUNT));
        assert_eq!(
            seg.counts().iter().map(|(_, n)| n).sum::<usize>(),
            ROWS.len()
        );
    }

    #[test]
    fn clusters_do_not_depend_on_row_order() {
        let mut reversed = ROWS.to_vec();
        reversed.reverse();
        let mut audit = AuditLog::new();
        let forward = segment_customers(&policies(&csv_of(ROWS)), &mut audit).ok().unwrap();
        let backward = segment_customers(&policies(&csv_of(&reversed)), &mut audit)
            .ok()
            .unwrap();

        let by_id = |seg: &Segmentation| -> BTreeMap<String, usize> {
            seg.assignments
                .iter()
                .map(|a| (a.id_cliente.clone(), a.cluster))
                .collect()
        };
        assert_eq!(by_id(&forward), by_id(&backward));
    }

    #[test]
    fn fewer_points_than_clusters() {
        let mut audit = AuditLog::new();
        let seg = segment_customers(
            &policies(&csv_of(&["C1,Ana", "C2,Beto", "C1,Ana"])),
            &mut audit,
        )
        .ok()
        .unwrap();
        assert_eq!(seg.centroids.len(), 2);
        assert_eq!(seg.assignments[0].cluster, seg.assignments[2].cluster);
        assert_ne!(seg.assignments[0].cluster, seg.assignments[1].cluster);
    }

    #[test]
    fn missing_contractor_disables_clustering() {
        let mut audit = AuditLog::new();
        let outcome = segment_customers(&policies("id_cliente\nC1\n"), &mut audit);
        assert!(matches!(
            outcome,
            Outcome::Error {
                kind: ErrorKind::SchemaMismatch,
                ..
            }
        ));
    }

    #[test]
    fn export_table_is_sorted_by_cluster() {
        let mut audit = AuditLog::new();
        let seg = segment_customers(&policies(&csv_of(ROWS)), &mut audit)
            .ok()
            .unwrap();
        let table = seg.to_table();
        let clusters: Vec<usize> = table
            .values("cluster")
            .map(|v| v.parse().unwrap())
            .collect();
        let mut sorted = clusters.clone();
        sorted.sort();
        assert_eq!(clusters, sorted);
    }

    #[test]
    fn segment_labels_are_letters() {
        assert_eq!(segment_label(0), "A");
        assert_eq!(segment_label(1), "B");
        assert_eq!(segment_label(2), "C");
        assert_eq!(segment_label(30), "30");
    }
}
