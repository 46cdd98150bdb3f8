//! Student aggregation and k-means clustering
//!
//! Scored (student, class) rows are averaged into one feature vector per
//! student, standardised, and partitioned with seeded k-means++ / Lloyd.
//! Labels are canonicalised by first appearance in student order, so a given
//! seed always reproduces identical labels.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::ClusteringConfig;
use crate::error::PipelineError;
use crate::types::{
    ClusterProfile, ClusterReduction, EngagementScoreRecord, StudentClusterRecord,
    StudentFeatures, StudentId,
};

const DIMS: usize = 5;

type Point = [f64; DIMS];

/// Result of the aggregate-and-cluster stage
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutput {
    /// One record per student, ordered by `student_id`
    pub students: Vec<StudentClusterRecord>,
    /// One profile per non-empty cluster, ordered by label
    pub profiles: Vec<ClusterProfile>,
    /// Present when the requested k was lowered to fit the data
    pub reduction: Option<ClusterReduction>,
}

/// Per-student aggregate before clustering
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAggregate {
    pub student_id: StudentId,
    pub student_name: String,
    pub room: String,
    pub unit: String,
    pub class_count: usize,
    pub features: StudentFeatures,
}

/// Aggregator and clusterer
#[derive(Debug, Clone, Default)]
pub struct Clusterer {
    config: ClusteringConfig,
}

impl Clusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Aggregate scored rows per student and cluster the students
    pub fn run(&self, scores: &[EngagementScoreRecord]) -> Result<ClusterOutput, PipelineError> {
        let students = aggregate(scores);
        if students.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }

        let raw: Vec<Point> = students.iter().map(|s| s.features.to_array()).collect();
        let k = self.effective_k(&raw);
        let reduction = (k < self.config.clusters).then(|| ClusterReduction {
            requested: self.config.clusters,
            effective: k,
        });
        if let Some(reduction) = reduction {
            tracing::warn!(
                requested = reduction.requested,
                effective = reduction.effective,
                "reduced cluster count to fit the data"
            );
        }

        let standardized = standardize(&raw);
        let labels = canonicalize(&self.fit(&standardized, k));

        let profiles = profiles(&students, &labels);
        let students: Vec<StudentClusterRecord> = students
            .into_iter()
            .zip(labels)
            .map(|(s, cluster)| StudentClusterRecord {
                student_id: s.student_id,
                student_name: s.student_name,
                room: s.room,
                unit: s.unit,
                class_count: s.class_count,
                features: s.features,
                cluster,
            })
            .collect();

        tracing::info!(
            students = students.len(),
            clusters = profiles.len(),
            "clustered students"
        );

        Ok(ClusterOutput {
            students,
            profiles,
            reduction,
        })
    }

    /// min(requested, students, distinct feature vectors), at least 1
    fn effective_k(&self, points: &[Point]) -> usize {
        let distinct: BTreeSet<[u64; DIMS]> =
            points.iter().map(|p| p.map(f64::to_bits)).collect();
        self.config
            .clusters
            .min(points.len())
            .min(distinct.len())
            .max(1)
    }

    /// Best of `n_init` seeded restarts by inertia
    fn fit(&self, points: &[Point], k: usize) -> Vec<usize> {
        if k == 1 {
            return vec![0; points.len()];
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut best: Option<(f64, Vec<usize>)> = None;

        for restart in 0..self.config.n_init {
            let centroids = initialize_centroids_kmeans_pp(points, k, &mut rng);
            let (assignments, inertia) = lloyd(points, centroids, self.config.max_iterations);
            tracing::trace!(restart, inertia, "k-means restart finished");

            if best.as_ref().map_or(true, |(b, _)| inertia < *b) {
                best = Some((inertia, assignments));
            }
        }

        best.map(|(_, assignments)| assignments)
            .unwrap_or_else(|| vec![0; points.len()])
    }
}

/// Group scored rows by student and average their features
pub fn aggregate(scores: &[EngagementScoreRecord]) -> Vec<StudentAggregate> {
    struct Accumulator<'a> {
        first: &'a EngagementScoreRecord,
        sums: Point,
        count: usize,
    }

    let mut groups: BTreeMap<&StudentId, Accumulator> = BTreeMap::new();
    for record in scores {
        let s = &record.sub_scores;
        let values = [
            s.prep_score,
            s.attendance_score,
            s.homework_score,
            s.interaction_score,
            record.engagement,
        ];
        let acc = groups
            .entry(&record.cleaned.student_id)
            .or_insert(Accumulator {
                first: record,
                sums: [0.0; DIMS],
                count: 0,
            });
        for (sum, value) in acc.sums.iter_mut().zip(values) {
            *sum += value;
        }
        acc.count += 1;
    }

    groups
        .into_values()
        .map(|acc| {
            let n = acc.count as f64;
            StudentAggregate {
                student_id: acc.first.cleaned.student_id.clone(),
                student_name: acc.first.cleaned.student_name.clone(),
                room: acc.first.cleaned.room.clone(),
                unit: acc.first.cleaned.unit.clone(),
                class_count: acc.count,
                features: StudentFeatures::from_array(acc.sums.map(|sum| sum / n)),
            }
        })
        .collect()
}

/// Z-score every column with population variance; constant columns scale by 1
pub fn standardize(points: &[Point]) -> Vec<Point> {
    if points.is_empty() {
        return Vec::new();
    }
    let n = points.len() as f64;

    let mut mean = [0.0; DIMS];
    for p in points {
        for d in 0..DIMS {
            mean[d] += p[d] / n;
        }
    }

    let mut variance = [0.0; DIMS];
    for p in points {
        for d in 0..DIMS {
            variance[d] += (p[d] - mean[d]).powi(2) / n;
        }
    }
    let scale = variance.map(|var| {
        let s = var.sqrt();
        if s > f64::EPSILON {
            s
        } else {
            1.0
        }
    });

    points
        .iter()
        .map(|p| std::array::from_fn(|d| (p[d] - mean[d]) / scale[d]))
        .collect()
}

fn squared_distance(a: &Point, b: &Point) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// First point uniformly, the rest with probability proportional to D²
fn initialize_centroids_kmeans_pp(points: &[Point], k: usize, rng: &mut ChaCha8Rng) -> Vec<Point> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    let mut nearest: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            nearest
                .iter()
                .position(|d| {
                    cumulative += d;
                    cumulative > target
                })
                // rounding can leave target at the very end
                .unwrap_or_else(|| last_positive(&nearest))
        } else {
            rng.gen_range(0..points.len())
        };

        let centroid = points[chosen];
        for (d, p) in nearest.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

fn last_positive(weights: &[f64]) -> usize {
    weights.iter().rposition(|d| *d > 0.0).unwrap_or(0)
}

fn find_nearest_centroid(point: &Point, centroids: &[Point]) -> usize {
    let mut best_idx = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_idx = i;
        }
    }
    best_idx
}

/// Lloyd iterations from the given centroids; returns assignments and inertia
fn lloyd(points: &[Point], mut centroids: Vec<Point>, max_iterations: usize) -> (Vec<usize>, f64) {
    let mut assignments = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = find_nearest_centroid(point, &centroids);
            if nearest != assignments[i] {
                changed = true;
                assignments[i] = nearest;
            }
        }

        if !changed {
            break;
        }
        recompute_centroids(points, &assignments, &mut centroids);
    }

    let inertia = points
        .iter()
        .zip(&assignments)
        .map(|(p, &c)| squared_distance(p, &centroids[c]))
        .sum();
    (assignments, inertia)
}

/// Move centroids to their members' mean; re-seed empty clusters with the
/// point farthest from its current centroid
fn recompute_centroids(points: &[Point], assignments: &[usize], centroids: &mut [Point]) {
    let k = centroids.len();
    let mut sums = vec![[0.0; DIMS]; k];
    let mut counts = vec![0usize; k];
    for (p, &c) in points.iter().zip(assignments) {
        for d in 0..DIMS {
            sums[c][d] += p[d];
        }
        counts[c] += 1;
    }

    let previous = centroids.to_vec();
    let mut taken = BTreeSet::new();
    for c in 0..k {
        if counts[c] > 0 {
            let n = counts[c] as f64;
            centroids[c] = sums[c].map(|sum| sum / n);
            continue;
        }

        let farthest = points
            .iter()
            .enumerate()
            .filter(|(i, _)| !taken.contains(i))
            .map(|(i, p)| (i, squared_distance(p, &previous[assignments[i]])))
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, bd)) if bd >= d => best,
                _ => Some((i, d)),
            });
        if let Some((i, _)) = farthest {
            taken.insert(i);
            centroids[c] = points[i];
        }
    }
}

/// Relabel clusters 0, 1, 2... in order of first appearance
fn canonicalize(assignments: &[usize]) -> Vec<usize> {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    assignments
        .iter()
        .map(|raw| {
            let next = mapping.len();
            *mapping.entry(*raw).or_insert(next)
        })
        .collect()
}

/// Mean features per cluster in original units
fn profiles(students: &[StudentAggregate], labels: &[usize]) -> Vec<ClusterProfile> {
    let mut groups: BTreeMap<usize, (Point, usize)> = BTreeMap::new();
    for (student, &label) in students.iter().zip(labels) {
        let (sums, count) = groups.entry(label).or_insert(([0.0; DIMS], 0));
        for (sum, value) in sums.iter_mut().zip(student.features.to_array()) {
            *sum += value;
        }
        *count += 1;
    }

    groups
        .into_iter()
        .map(|(cluster, (sums, count))| ClusterProfile {
            cluster,
            student_count: count,
            features: StudentFeatures::from_array(sums.map(|sum| sum / count as f64)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CleanedRecord, EngagementBand, RecommendedAction, SubScores};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn scored(name: &str, class_number: usize, scores: [f64; 4], engagement: f64) -> EngagementScoreRecord {
        EngagementScoreRecord {
            cleaned: CleanedRecord {
                student_id: StudentId::from_parts(&name.to_lowercase(), "8a", "paulista"),
                line: 4,
                student_name: name.to_string(),
                room: "8A".to_string(),
                unit: "Paulista".to_string(),
                class_number,
                class_date: NaiveDate::from_ymd_opt(2024, 2, 12).unwrap(),
                preparation: None,
                attendance: None,
                homework: None,
                participation: None,
            },
            sub_scores: SubScores {
                prep_score: scores[0],
                attendance_score: scores[1],
                homework_score: scores[2],
                interaction_score: scores[3],
            },
            engagement,
            engagement_pct: engagement * 100.0,
            band: EngagementBand::ReinforceRoutine,
            recommended_action: RecommendedAction::StandardFollowUp,
        }
    }

    fn clusterer(clusters: usize, seed: u64) -> Clusterer {
        Clusterer::new(ClusteringConfig {
            clusters,
            seed,
            ..ClusteringConfig::default()
        })
    }

    /// Three well-separated groups of students
    fn grouped_scores() -> Vec<EngagementScoreRecord> {
        let mut rows = Vec::new();
        for i in 0..6 {
            let jitter = i as f64 * 0.01;
            rows.push(scored(&format!("High{i}"), 1, [1.0 - jitter, 1.0, 1.0, 1.0], 0.95));
            rows.push(scored(&format!("Mid{i}"), 1, [0.5, 1.0, 0.5 + jitter, 0.5], 0.6));
            rows.push(scored(&format!("Low{i}"), 1, [0.0, 0.0, jitter, 0.3], 0.05));
        }
        rows
    }

    #[test]
    fn test_aggregate_means_per_student() {
        let rows = vec![
            scored("Bia", 1, [1.0, 1.0, 0.0, 1.0], 0.8),
            scored("Ana", 1, [1.0, 1.0, 1.0, 1.0], 1.0),
            scored("Ana", 2, [0.0, 0.0, 1.0, 0.0], 0.2),
        ];

        let students = aggregate(&rows);
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].student_name, "Ana");
        assert_eq!(students[0].class_count, 2);
        assert_eq!(
            students[0].features,
            StudentFeatures {
                prep_score: 0.5,
                attendance_score: 0.5,
                homework_score: 1.0,
                interaction_score: 0.5,
                engagement: 0.6,
            }
        );
        assert_eq!(students[1].class_count, 1);
    }

    #[test]
    fn test_standardize_handles_constant_columns() {
        let points = vec![[1.0, 0.0, 2.0, 5.0, 0.5], [3.0, 0.0, 2.0, 5.0, 0.5]];
        let z = standardize(&points);
        assert_eq!(z[0], [-1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(z[1], [1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_two_distinct_students_get_different_clusters() {
        let rows = vec![
            scored("Ana", 1, [1.0, 1.0, 1.0, 1.0], 1.0),
            scored("Bruno", 1, [0.0, 1.0, 0.0, 1.0 / 3.0], 0.45),
        ];

        let output = clusterer(4, 42).run(&rows).unwrap();
        assert_eq!(
            output.reduction,
            Some(ClusterReduction {
                requested: 4,
                effective: 2
            })
        );
        assert_eq!(output.students[0].cluster, 0);
        assert_eq!(output.students[1].cluster, 1);
        assert_eq!(output.profiles.len(), 2);
    }

    #[test]
    fn test_identical_students_collapse_to_one_cluster() {
        let rows = vec![
            scored("Ana", 1, [1.0, 1.0, 1.0, 1.0], 1.0),
            scored("Bruno", 1, [1.0, 1.0, 1.0, 1.0], 1.0),
            scored("Caio", 1, [1.0, 1.0, 1.0, 1.0], 1.0),
        ];

        let output = clusterer(2, 42).run(&rows).unwrap();
        assert_eq!(output.reduction.map(|r| r.effective), Some(1));
        assert!(output.students.iter().all(|s| s.cluster == 0));
        assert_eq!(output.profiles[0].student_count, 3);
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(
            Clusterer::default().run(&[]),
            Err(PipelineError::EmptyDataset)
        ));
    }

    #[test]
    fn test_separated_groups_are_recovered() {
        let output = clusterer(3, 7).run(&grouped_scores()).unwrap();
        assert_eq!(output.reduction, None);

        let label_of = |prefix: &str| -> BTreeSet<usize> {
            output
                .students
                .iter()
                .filter(|s| s.student_name.starts_with(prefix))
                .map(|s| s.cluster)
                .collect()
        };
        let (high, mid, low) = (label_of("High"), label_of("Mid"), label_of("Low"));
        assert_eq!(high.len(), 1);
        assert_eq!(mid.len(), 1);
        assert_eq!(low.len(), 1);
        assert_eq!(high.union(&mid).chain(low.iter()).collect::<BTreeSet<_>>().len(), 3);

        let counts: Vec<usize> = output.profiles.iter().map(|p| p.student_count).collect();
        assert_eq!(counts, vec![6, 6, 6]);
    }

    #[test]
    fn test_same_seed_reproduces_labels() {
        let rows = grouped_scores();
        let first = clusterer(4, 42).run(&rows).unwrap();
        let second = clusterer(4, 42).run(&rows).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_labels_are_canonical() {
        let output = clusterer(4, 3).run(&grouped_scores()).unwrap();
        let mut next = 0;
        for student in &output.students {
            assert!(student.cluster <= next);
            if student.cluster == next {
                next += 1;
            }
        }
        assert_eq!(output.students[0].cluster, 0);
        assert_eq!(canonicalize(&[2, 2, 0, 1, 0]), vec![0, 0, 1, 2, 1]);
    }

    #[test]
    fn test_profile_counts_cover_all_students() {
        let rows = grouped_scores();
        let output = clusterer(4, 9).run(&rows).unwrap();
        let total: usize = output.profiles.iter().map(|p| p.student_count).sum();
        assert_eq!(total, output.students.len());
        for profile in &output.profiles {
            assert!((0.0..=1.0).contains(&profile.features.engagement));
        }
    }
}
