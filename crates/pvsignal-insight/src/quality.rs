//! Clustering quality scores.

use pvsignal_vector::cosine_distance;

use crate::types::{Clustering, ClusteringQuality};

/// Silhouette is computed on at most this many non-noise records (the first
/// ones in record order) to bound its quadratic cost.
pub const SILHOUETTE_SAMPLE: usize = 2000;

pub fn clustering_quality(vectors: &[Vec<f32>], clustering: &Clustering) -> ClusteringQuality {
    let n_clusters = clustering.clusters.len();
    let n_noise = clustering.noise.len();
    let total = clustering.labels.len();

    ClusteringQuality {
        n_clusters,
        n_noise,
        noise_ratio: if total == 0 {
            0.0
        } else {
            n_noise as f64 / total as f64
        },
        silhouette: silhouette(vectors, clustering),
        davies_bouldin: davies_bouldin(vectors, clustering),
        calinski_harabasz: calinski_harabasz(vectors, clustering),
    }
}

/// Mean silhouette coefficient under cosine distance. `None` unless the
/// sample spans at least two clusters.
fn silhouette(vectors: &[Vec<f32>], clustering: &Clustering) -> Option<f64> {
    let sample: Vec<usize> = (0..clustering.labels.len())
        .filter(|&i| !clustering.is_noise(i))
        .take(SILHOUETTE_SAMPLE)
        .collect();

    let mut ids: Vec<i32> = sample.iter().map(|&i| clustering.labels[i]).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() < 2 {
        return None;
    }

    let mut total = 0.0;
    for &i in &sample {
        let own = clustering.labels[i];
        // (sum, count) of distances per cluster id, indexed via `ids`.
        let mut sums = vec![(0.0f64, 0usize); ids.len()];
        for &j in &sample {
            if i == j {
                continue;
            }
            if let Ok(slot) = ids.binary_search(&clustering.labels[j]) {
                sums[slot].0 += cosine_distance(&vectors[i], &vectors[j]);
                sums[slot].1 += 1;
            }
        }

        let Ok(own_slot) = ids.binary_search(&own) else {
            continue;
        };
        let (own_sum, own_count) = sums[own_slot];
        if own_count == 0 {
            // Singleton in the sample contributes 0.
            continue;
        }
        let a = own_sum / own_count as f64;
        let b = sums
            .iter()
            .enumerate()
            .filter(|(slot, (_, count))| *slot != own_slot && *count > 0)
            .map(|(_, (sum, count))| sum / *count as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if b.is_finite() && denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    Some(total / sample.len() as f64)
}

/// Davies–Bouldin index with Euclidean centroids. Lower is better.
fn davies_bouldin(vectors: &[Vec<f32>], clustering: &Clustering) -> Option<f64> {
    if clustering.clusters.len() < 2 {
        return None;
    }

    let centroids = centroids(vectors, clustering);

    let scatter: Vec<f64> = clustering
        .clusters
        .iter()
        .zip(&centroids)
        .map(|(c, centroid)| {
            c.members
                .iter()
                .map(|&m| euclidean(&vectors[m], centroid))
                .sum::<f64>()
                / c.members.len() as f64
        })
        .collect();

    let k = centroids.len();
    let mut total = 0.0;
    for i in 0..k {
        let mut worst = 0.0f64;
        for j in 0..k {
            if i == j {
                continue;
            }
            let separation = euclidean_f64(&centroids[i], &centroids[j]);
            // Coincident centroids contribute nothing rather than infinity.
            if separation > 0.0 {
                worst = worst.max((scatter[i] + scatter[j]) / separation);
            }
        }
        total += worst;
    }
    Some(total / k as f64)
}

/// Calinski–Harabasz index over non-noise records: between-cluster
/// dispersion over within-cluster dispersion, each scaled by its degrees of
/// freedom. Higher is better. `1.0` when every cluster is a single point.
fn calinski_harabasz(vectors: &[Vec<f32>], clustering: &Clustering) -> Option<f64> {
    let k = clustering.clusters.len();
    if k < 2 {
        return None;
    }
    let n: usize = clustering.clusters.iter().map(|c| c.members.len()).sum();

    let centroids = centroids(vectors, clustering);
    let dim = centroids[0].len();
    let mut overall = vec![0.0f64; dim];
    for (c, centroid) in clustering.clusters.iter().zip(&centroids) {
        for (acc, x) in overall.iter_mut().zip(centroid) {
            *acc += x * c.members.len() as f64;
        }
    }
    overall.iter_mut().for_each(|v| *v /= n as f64);

    let mut between = 0.0;
    let mut within = 0.0;
    for (c, centroid) in clustering.clusters.iter().zip(&centroids) {
        between += c.members.len() as f64 * euclidean_f64(centroid, &overall).powi(2);
        within += c
            .members
            .iter()
            .map(|&m| euclidean(&vectors[m], centroid).powi(2))
            .sum::<f64>();
    }

    if within == 0.0 {
        return Some(1.0);
    }
    Some(between * (n - k) as f64 / (within * (k - 1) as f64))
}

/// Euclidean centroid of each cluster, in cluster order.
fn centroids(vectors: &[Vec<f32>], clustering: &Clustering) -> Vec<Vec<f64>> {
    clustering
        .clusters
        .iter()
        .map(|c| {
            let dim = vectors[c.members[0]].len();
            let mut centroid = vec![0.0f64; dim];
            for &m in &c.members {
                for (acc, x) in centroid.iter_mut().zip(&vectors[m]) {
                    *acc += *x as f64;
                }
            }
            centroid.iter_mut().for_each(|v| *v /= c.members.len() as f64);
            centroid
        })
        .collect()
}

fn euclidean(a: &[f32], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (*x as f64 - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn euclidean_f64(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cluster;

    fn clustering(labels: Vec<i32>) -> Clustering {
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut noise = Vec::new();
        for (i, &l) in labels.iter().enumerate() {
            if l < 0 {
                noise.push(i);
                continue;
            }
            match clusters.iter_mut().find(|c| c.cluster_id == l) {
                Some(c) => c.members.push(i),
                None => clusters.push(Cluster {
                    cluster_id: l,
                    members: vec![i],
                }),
            }
        }
        Clustering {
            labels,
            clusters,
            noise,
        }
    }

    #[test]
    fn test_counts_and_noise_ratio() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]];
        let q = clustering_quality(&vectors, &clustering(vec![0, 0, -1, -1]));
        assert_eq!(q.n_clusters, 1);
        assert_eq!(q.n_noise, 2);
        assert!((q.noise_ratio - 0.5).abs() < 1e-12);
        assert_eq!(q.silhouette, None);
        assert_eq!(q.davies_bouldin, None);
        assert_eq!(q.calinski_harabasz, None);
    }

    #[test]
    fn test_well_separated_clusters_score_well() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![1.0, 0.01],
            vec![0.0, 1.0],
            vec![0.01, 1.0],
        ];
        let q = clustering_quality(&vectors, &clustering(vec![0, 0, 1, 1]));
        let s = q.silhouette.unwrap();
        assert!(s > 0.9, "silhouette {s}");
        let db = q.davies_bouldin.unwrap();
        assert!(db < 0.1, "davies-bouldin {db}");
    }

    #[test]
    fn test_calinski_harabasz() {
        // Centroids (0, 0) and (4, 0), overall mean (2, 0).
        // Between: 2 * 4 + 2 * 4 = 16. Within: 4 * 1 = 4. n = 4, k = 2.
        let vectors = vec![
            vec![0.0, 1.0],
            vec![0.0, -1.0],
            vec![4.0, 1.0],
            vec![4.0, -1.0],
        ];
        let q = clustering_quality(&vectors, &clustering(vec![0, 0, 1, 1]));
        let ch = q.calinski_harabasz.unwrap();
        assert!((ch - 8.0).abs() < 1e-9, "calinski-harabasz {ch}");

        // Noise is left out: the stray point does not change the score.
        let mut with_noise = vectors.clone();
        with_noise.push(vec![50.0, 50.0]);
        let q = clustering_quality(&with_noise, &clustering(vec![0, 0, 1, 1, -1]));
        assert!((q.calinski_harabasz.unwrap() - 8.0).abs() < 1e-9);

        // Zero within-cluster dispersion.
        let points = vec![vec![0.0, 0.0], vec![0.0, 0.0], vec![3.0, 0.0]];
        let q = clustering_quality(&points, &clustering(vec![0, 0, 1]));
        assert_eq!(q.calinski_harabasz, Some(1.0));
    }

    #[test]
    fn test_bad_partition_scores_poorly() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.01],
            vec![0.01, 1.0],
        ];
        let q = clustering_quality(&vectors, &clustering(vec![0, 0, 1, 1]));
        assert!(q.silhouette.unwrap() < 0.0);
    }

    #[test]
    fn test_empty() {
        let q = clustering_quality(&[], &Clustering::default());
        assert_eq!(q.n_clusters, 0);
        assert_eq!(q.noise_ratio, 0.0);
    }
}
