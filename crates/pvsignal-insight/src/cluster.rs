//! Partitioning of embedded records into clusters plus noise.
//!
//! All three methods are deterministic for a given input order. Raw labels
//! are renumbered `0..` by each cluster's lowest member index, so cluster ids
//! depend only on the data, never on hash or iteration order.

use std::collections::{BTreeMap, VecDeque};

use hdbscan::{Hdbscan, HdbscanHyperParams};
use tracing::{debug, info, warn};

use pvsignal_core::{ClusterMethod, NOISE_CLUSTER_ID};
use pvsignal_vector::cosine_distance;

use crate::error::InsightError;
use crate::types::{Cluster, ClusterParams, Clustering};

/// Cluster `vectors` (one per record, equal lengths) with `params.method`.
pub fn cluster(vectors: &[Vec<f32>], params: &ClusterParams) -> Result<Clustering, InsightError> {
    if vectors.is_empty() {
        return Ok(Clustering::default());
    }
    let dim = vectors[0].len();
    if let Some(i) = vectors.iter().position(|v| v.len() != dim) {
        return Err(InsightError::InvalidInput(format!(
            "vector {} has dimension {}, expected {}",
            i,
            vectors[i].len(),
            dim
        )));
    }

    let clustering = match params.method {
        ClusterMethod::Dbscan => finalize(
            &dbscan(vectors, params.eps, params.min_points.max(1)),
            params.min_cluster_size,
        ),
        ClusterMethod::KMeans => finalize(&kmeans(vectors, params.k, params.max_iterations), 1),
        ClusterMethod::Hdbscan => finalize(
            &hdbscan_labels(vectors, params.min_cluster_size, params.min_points),
            params.min_cluster_size,
        ),
    };

    info!(
        method = params.method.as_str(),
        records = vectors.len(),
        clusters = clustering.clusters.len(),
        noise = clustering.noise.len(),
        "Clustering complete"
    );
    Ok(clustering)
}

/// Indices within `eps` cosine distance of `point`, ascending, `point` included.
fn region_query(vectors: &[Vec<f32>], point: usize, eps: f64) -> Vec<usize> {
    (0..vectors.len())
        .filter(|&j| j == point || cosine_distance(&vectors[point], &vectors[j]) <= eps)
        .collect()
}

/// DBSCAN over cosine distance.
///
/// Points are visited in index order and clusters grow breadth-first, so a
/// border point reachable from two clusters joins whichever reached it first.
fn dbscan(vectors: &[Vec<f32>], eps: f64, min_points: usize) -> Vec<i32> {
    let n = vectors.len();
    let mut labels: Vec<Option<i32>> = vec![None; n];
    let mut next_id = 0i32;

    for point in 0..n {
        if labels[point].is_some() {
            continue;
        }
        let neighbours = region_query(vectors, point, eps);
        if neighbours.len() < min_points {
            labels[point] = Some(NOISE_CLUSTER_ID);
            continue;
        }

        let id = next_id;
        next_id += 1;
        labels[point] = Some(id);

        let mut queue: VecDeque<usize> = neighbours.into_iter().filter(|&j| j != point).collect();
        while let Some(j) = queue.pop_front() {
            match labels[j] {
                Some(NOISE_CLUSTER_ID) => labels[j] = Some(id),
                Some(_) => {}
                None => {
                    labels[j] = Some(id);
                    let reach = region_query(vectors, j, eps);
                    if reach.len() >= min_points {
                        queue.extend(reach);
                    }
                }
            }
        }
    }

    labels
        .into_iter()
        .map(|l| l.unwrap_or(NOISE_CLUSTER_ID))
        .collect()
}

/// Lloyd's k-means under cosine distance with farthest-point seeding.
///
/// Seeding starts at record 0 and repeatedly adds the record farthest from
/// every chosen centroid (lowest index on ties). Assignment ties go to the
/// lowest centroid index. No randomness is involved.
fn kmeans(vectors: &[Vec<f32>], k: usize, max_iterations: usize) -> Vec<i32> {
    let n = vectors.len();
    let k = k.clamp(1, n);
    let dim = vectors[0].len();

    let mut centroids: Vec<Vec<f32>> = vec![vectors[0].clone()];
    let mut nearest: Vec<f64> = vectors
        .iter()
        .map(|v| cosine_distance(v, &vectors[0]))
        .collect();
    while centroids.len() < k {
        let mut best = 0usize;
        for i in 1..n {
            if nearest[i] > nearest[best] {
                best = i;
            }
        }
        if nearest[best] <= 0.0 {
            // Remaining records all coincide with a centroid.
            break;
        }
        centroids.push(vectors[best].clone());
        for (i, v) in vectors.iter().enumerate() {
            nearest[i] = nearest[i].min(cosine_distance(v, &vectors[best]));
        }
    }

    let assign = |centroids: &[Vec<f32>], v: &[f32]| -> usize {
        let mut best = 0usize;
        let mut best_dist = f64::INFINITY;
        for (c, centroid) in centroids.iter().enumerate() {
            let d = cosine_distance(v, centroid);
            if d < best_dist {
                best = c;
                best_dist = d;
            }
        }
        best
    };

    let mut assignment: Vec<usize> = vectors.iter().map(|v| assign(&centroids, v)).collect();
    for iteration in 0..max_iterations {
        let mut sums = vec![vec![0.0f64; dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (v, &c) in vectors.iter().zip(&assignment) {
            counts[c] += 1;
            for (s, x) in sums[c].iter_mut().zip(v) {
                *s += *x as f64;
            }
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] > 0 {
                for (dst, s) in centroid.iter_mut().zip(&sums[c]) {
                    *dst = (*s / counts[c] as f64) as f32;
                }
            }
        }

        let next: Vec<usize> = vectors.iter().map(|v| assign(&centroids, v)).collect();
        if next == assignment {
            debug!(iterations = iteration + 1, "k-means converged");
            break;
        }
        assignment = next;
    }

    assignment.into_iter().map(|c| c as i32).collect()
}

/// HDBSCAN via the `hdbscan` crate. Euclidean distance on unit vectors
/// orders pairs the same way cosine distance does.
fn hdbscan_labels(vectors: &[Vec<f32>], min_cluster_size: usize, min_samples: usize) -> Vec<i32> {
    let min_cluster_size = min_cluster_size.max(2);
    if vectors.len() < min_cluster_size {
        warn!(records = vectors.len(), "Too few records for HDBSCAN; treating all as noise");
        return vec![NOISE_CLUSTER_ID; vectors.len()];
    }

    let hyper_params = HdbscanHyperParams::builder()
        .min_cluster_size(min_cluster_size)
        .min_samples(min_samples.clamp(1, vectors.len()))
        .build();

    // `Hdbscan::new` borrows an owned `Vec`.
    let data = vectors.to_vec();
    match Hdbscan::new(&data, hyper_params).cluster() {
        Ok(labels) => labels,
        Err(e) => {
            warn!(error = ?e, records = vectors.len(), "HDBSCAN failed; treating all records as noise");
            vec![NOISE_CLUSTER_ID; vectors.len()]
        }
    }
}

/// Group raw labels, demote groups smaller than `min_cluster_size` to noise
/// and renumber the rest by first member.
fn finalize(raw: &[i32], min_cluster_size: usize) -> Clustering {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, &label) in raw.iter().enumerate() {
        if label >= 0 {
            groups.entry(label).or_default().push(i);
        }
    }

    let mut kept: Vec<Vec<usize>> = groups
        .into_values()
        .filter(|members| members.len() >= min_cluster_size)
        .collect();
    kept.sort_by_key(|members| members[0]);

    let mut labels = vec![NOISE_CLUSTER_ID; raw.len()];
    let clusters: Vec<Cluster> = kept
        .into_iter()
        .enumerate()
        .map(|(id, members)| {
            for &m in &members {
                labels[m] = id as i32;
            }
            Cluster {
                cluster_id: id as i32,
                members,
            }
        })
        .collect();

    let noise = labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| l == NOISE_CLUSTER_ID)
        .map(|(i, _)| i)
        .collect();

    Clustering {
        labels,
        clusters,
        noise,
    }
}
