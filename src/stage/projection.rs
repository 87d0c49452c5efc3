//! Projection stage: labels the iris measurements and adds a 2-D embedding.
//!
//! The input is the raw iris CSV (one header line, four measurements and an
//! integer class per row). The stage writes a cleaned CSV with named classes
//! and two projection columns, plus an SVG scatter plot of the projection.
//! The embedding is a principal component projection computed with
//! `ndarray`.

use std::fmt::Write as _;

use async_trait::async_trait;
use ndarray::{Array1, Array2, Axis};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use super::{Stage, StageInput, StageOutput};
use crate::error::StageError;

/// File name of the scatter plot artifact.
pub const PLOT_NAME: &str = "projection.svg";

pub const FEATURE_COLUMNS: [&str; 4] = ["sepal_length", "sepal_width", "petal_length", "petal_width"];
pub const TARGET_NAMES: [&str; 3] = ["setosa", "versicolor", "virginica"];

const PROJECTION_METHOD_TAG: &str = "projectionMethod";
const ROW_COUNT_TAG: &str = "rowCount";

const POWER_ITERATIONS: usize = 500;
const CONVERGENCE_EPS: f64 = 1e-12;

/// One labelled observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: [f64; 4],
    pub target: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectionStage;

impl ProjectionStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for ProjectionStage {
    fn kind(&self) -> &'static str {
        "projection"
    }

    fn requires_input(&self) -> bool {
        true
    }

    async fn produce(&self, ctx: StageInput<'_>) -> Result<StageOutput, StageError> {
        let input = ctx
            .input
            .ok_or_else(|| StageError::MissingInput(self.kind().to_string()))?;

        let file = ctx.artifacts.reader(&input.uri).await?;
        let samples = read_samples(BufReader::new(file)).await?;
        tracing::info!(rows = samples.len(), input = %input.uri, "Computing projection");

        let projection = project(&samples)?;

        let data_path = ctx.staging_dir.join(&ctx.params.artifact_name);
        write_clean_csv(&data_path, &samples, &projection).await?;

        let plot_path = ctx.staging_dir.join(PLOT_NAME);
        tokio::fs::write(&plot_path, render_svg(&samples, &projection)).await?;

        Ok(StageOutput::new()
            .with_artifact(&ctx.params.artifact_name, data_path)
            .with_artifact(PLOT_NAME, plot_path)
            .with_tag(PROJECTION_METHOD_TAG, "pca")
            .with_tag(ROW_COUNT_TAG, samples.len().to_string()))
    }
}

/// Reads samples line by line. The first line is a header and is skipped.
pub async fn read_samples<R>(reader: R) -> Result<Vec<Sample>, StageError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut samples = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line_no == 1 || line.trim().is_empty() {
            continue;
        }
        samples.push(parse_sample(&line, line_no)?);
    }

    if samples.is_empty() {
        return Err(StageError::Transform("input contains no rows".into()));
    }
    Ok(samples)
}

fn parse_sample(line: &str, line_no: usize) -> Result<Sample, StageError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 5 {
        return Err(StageError::Transform(format!(
            "line {}: expected 5 fields, found {}",
            line_no,
            fields.len()
        )));
    }

    let mut features = [0.0; 4];
    for (slot, raw) in features.iter_mut().zip(&fields[..4]) {
        *slot = raw.parse().map_err(|_| {
            StageError::Transform(format!("line {}: invalid measurement '{}'", line_no, raw))
        })?;
    }

    let target = fields[4]
        .parse::<f64>()
        .ok()
        .filter(|t| t.fract() == 0.0 && *t >= 0.0)
        .and_then(|t| TARGET_NAMES.get(t as usize).copied())
        .ok_or_else(|| {
            StageError::Transform(format!("line {}: unknown class '{}'", line_no, fields[4]))
        })?;

    Ok(Sample { features, target })
}

/// Projects samples onto their first two principal components.
///
/// Component signs are fixed so the largest loading is positive, which
/// keeps the output stable across runs.
pub fn project(samples: &[Sample]) -> Result<Array2<f64>, StageError> {
    if samples.len() < 2 {
        return Err(StageError::Transform(
            "projection needs at least two rows".into(),
        ));
    }

    let flat: Vec<f64> = samples.iter().flat_map(|s| s.features).collect();
    let data = Array2::from_shape_vec((samples.len(), 4), flat)
        .map_err(|e| StageError::Transform(e.to_string()))?;

    let mean = data
        .mean_axis(Axis(0))
        .ok_or_else(|| StageError::Transform("empty input".into()))?;
    let centered = &data - &mean;
    let covariance = centered.t().dot(&centered) / (samples.len() as f64 - 1.0);

    let axes = principal_axes(covariance, 2);
    let mut basis = Array2::zeros((4, 2));
    for (i, axis) in axes.iter().enumerate() {
        basis.column_mut(i).assign(axis);
    }

    Ok(centered.dot(&basis))
}

/// Leading eigenvectors of a symmetric matrix by power iteration with
/// deflation.
fn principal_axes(mut matrix: Array2<f64>, count: usize) -> Vec<Array1<f64>> {
    let dim = matrix.nrows();
    let mut axes = Vec::with_capacity(count);

    for _ in 0..count {
        let start: Array1<f64> = (1..=dim).map(|i| i as f64).collect();
        let mut v = &start / start.dot(&start).sqrt();

        for _ in 0..POWER_ITERATIONS {
            let w = matrix.dot(&v);
            let norm = w.dot(&w).sqrt();
            if norm < CONVERGENCE_EPS {
                break;
            }
            let next = w / norm;
            let delta = (&next - &v).mapv(f64::abs).sum();
            v = next;
            if delta < CONVERGENCE_EPS {
                break;
            }
        }

        let largest = v
            .iter()
            .copied()
            .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if largest < 0.0 {
            v.mapv_inplace(|x| -x);
        }

        let eigenvalue = v.dot(&matrix.dot(&v));
        let column = v.view().insert_axis(Axis(1));
        let row = v.view().insert_axis(Axis(0));
        matrix = &matrix - &(column.dot(&row) * eigenvalue);

        axes.push(v);
    }

    axes
}

async fn write_clean_csv(
    path: &std::path::Path,
    samples: &[Sample],
    projection: &Array2<f64>,
) -> Result<(), StageError> {
    let mut out = BufWriter::new(tokio::fs::File::create(path).await?);

    let header = format!(",{},target,proj_1,proj_2\n", FEATURE_COLUMNS.join(","));
    out.write_all(header.as_bytes()).await?;

    for (i, (sample, coords)) in samples.iter().zip(projection.outer_iter()).enumerate() {
        let [a, b, c, d] = sample.features;
        let line = format!(
            "{},{:?},{:?},{:?},{:?},{},{:?},{:?}\n",
            i, a, b, c, d, sample.target, coords[0], coords[1]
        );
        out.write_all(line.as_bytes()).await?;
    }

    out.flush().await?;
    Ok(())
}

/// Renders a labelled scatter plot of the projection.
pub fn render_svg(samples: &[Sample], projection: &Array2<f64>) -> String {
    const WIDTH: f64 = 640.0;
    const HEIGHT: f64 = 480.0;
    const MARGIN: f64 = 40.0;
    const COLORS: [&str; 3] = ["#1f77b4", "#ff7f0e", "#2ca02c"];

    let xs = projection.column(0);
    let ys = projection.column(1);
    let (x_min, x_max) = bounds(xs.iter().copied());
    let (y_min, y_max) = bounds(ys.iter().copied());
    let sx = |x: f64| MARGIN + (x - x_min) / (x_max - x_min) * (WIDTH - 2.0 * MARGIN);
    let sy = |y: f64| HEIGHT - MARGIN - (y - y_min) / (y_max - y_min) * (HEIGHT - 2.0 * MARGIN);

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="{}" font-size="12" text-anchor="middle">proj_1</text>"#,
        WIDTH / 2.0,
        HEIGHT - 10.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="12" y="{}" font-size="12" transform="rotate(-90 12 {})" text-anchor="middle">proj_2</text>"#,
        HEIGHT / 2.0,
        HEIGHT / 2.0
    );

    for (sample, (x, y)) in samples.iter().zip(xs.iter().zip(ys.iter())) {
        let color = TARGET_NAMES
            .iter()
            .position(|name| *name == sample.target)
            .map_or("black", |i| COLORS[i]);
        let _ = writeln!(
            svg,
            r#"<circle cx="{:.2}" cy="{:.2}" r="3" fill="{}" fill-opacity="0.7"/>"#,
            sx(*x),
            sy(*y),
            color
        );
    }

    for (i, (name, color)) in TARGET_NAMES.iter().zip(COLORS).enumerate() {
        let y = MARGIN + i as f64 * 16.0;
        let _ = writeln!(
            svg,
            r#"<circle cx="{}" cy="{}" r="4" fill="{}"/><text x="{}" y="{}" font-size="12">{}</text>"#,
            WIDTH - 110.0,
            y,
            color,
            WIDTH - 100.0,
            y + 4.0,
            name
        );
    }

    svg.push_str("</svg>\n");
    svg
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 0.5, max + 0.5);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IRIS_HEAD: &str = "150,4,setosa,versicolor,virginica
5.1,3.5,1.4,0.2,0
4.9,3.0,1.4,0.2,0
7.0,3.2,4.7,1.4,1
6.4,3.2,4.5,1.5,1
6.3,3.3,6.0,2.5,2
5.8,2.7,5.1,1.9,2
";

    async fn samples() -> Vec<Sample> {
        read_samples(BufReader::new(IRIS_HEAD.as_bytes())).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_samples_skips_header_and_names_targets() {
        let samples = samples().await;
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].features, [5.1, 3.5, 1.4, 0.2]);
        assert_eq!(samples[0].target, "setosa");
        assert_eq!(samples[2].target, "versicolor");
        assert_eq!(samples[5].target, "virginica");
    }

    #[tokio::test]
    async fn test_read_samples_rejects_bad_rows() {
        for body in [
            "h\n1,2,3,4,7\n",
            "h\n1,2,3,4\n",
            "h\n1,x,3,4,0\n",
            "h\n",
        ] {
            let result = read_samples(BufReader::new(body.as_bytes())).await;
            assert!(matches!(result, Err(StageError::Transform(_))), "{body:?}");
        }
    }

    #[tokio::test]
    async fn test_projection_separates_setosa() {
        let samples = samples().await;
        let projection = project(&samples).unwrap();
        assert_eq!(projection.dim(), (6, 2));

        // Centered data projects to zero mean.
        let mean = projection.mean_axis(Axis(0)).unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-9));

        // Setosa rows sit on one side of the first component.
        let setosa_max = projection.column(0).iter().take(2).copied().fold(f64::MIN, f64::max);
        let other_min = projection.column(0).iter().skip(2).copied().fold(f64::MAX, f64::min);
        assert!(setosa_max < other_min);
    }

    #[tokio::test]
    async fn test_projection_is_deterministic() {
        let samples = samples().await;
        assert_eq!(project(&samples).unwrap(), project(&samples).unwrap());
    }

    #[test]
    fn test_principal_axes_of_diagonal_matrix() {
        let m = Array2::from_diag(&Array1::from(vec![1.0, 5.0, 2.0, 0.5]));
        let axes = principal_axes(m, 2);
        assert!((axes[0][1] - 1.0).abs() < 1e-6);
        assert!((axes[1][2] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_clean_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let samples = samples().await;
        let projection = project(&samples).unwrap();
        let path = dir.path().join("clean_data.csv");

        write_clean_csv(&path, &samples, &projection).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            ",sepal_length,sepal_width,petal_length,petal_width,target,proj_1,proj_2"
        );
        assert_eq!(lines.len(), 7);
        assert!(lines[1].starts_with("0,5.1,3.5,1.4,0.2,setosa,"));
        assert!(lines[2].starts_with("1,4.9,3.0,1.4,0.2,setosa,"));
        assert!(lines[6].starts_with("5,5.8,2.7,5.1,1.9,virginica,"));
    }

    #[tokio::test]
    async fn test_svg_has_one_point_per_row() {
        let samples = samples().await;
        let projection = project(&samples).unwrap();
        let svg = render_svg(&samples, &projection);
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches(r#"r="3""#).count(), samples.len());
    }
}
