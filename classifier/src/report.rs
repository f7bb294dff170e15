//! CSV rendering for similarity and prediction reports.
//!
//! String fields are always quoted, scores never are, and scores always use
//! four fractional digits with a `.` separator, so reports diff cleanly
//! across machines.

use std::io;
use std::path::Path;

use csv::{QuoteStyle, Writer, WriterBuilder};
use tokio::fs;
use tracing::info;

use crate::analysis::{PairwiseSimilarity, SimilarityMatrix};
use crate::error::Result;
use crate::processor::{Classification, ClassifiedDocument};

/// Header of the all-pairs report.
pub const PAIRS_HEADER: &str = "FileA,FileB,SimilarityScore";

/// Header of the predictions report.
pub const PREDICTIONS_HEADER: &str = "Filename,PredictedLabel,SimilarityScore,TopNeighbor";

/// Top-left cell of the matrix report.
pub const MATRIX_CORNER: &str = r"Training \ Query";

/// A writer that quotes every field that does not parse as a number.
///
/// `header` is emitted verbatim ahead of the first record.
fn report_writer(header: Option<&str>) -> Writer<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(header) = header {
        buffer.extend_from_slice(header.as_bytes());
        buffer.push(b'\n');
    }
    WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(buffer)
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}

fn score(value: f32) -> String {
    format!("{value:.4}")
}

/// Render the all-pairs report.
pub fn render_pairs(pairs: &[PairwiseSimilarity]) -> Result<String> {
    let mut writer = report_writer(Some(PAIRS_HEADER));
    for pair in pairs {
        writer.write_record([
            pair.first.as_str(),
            pair.second.as_str(),
            score(pair.score).as_str(),
        ])?;
    }
    finish(writer)
}

/// Render the training × query matrix. Incomparable cells are empty.
pub fn render_matrix(matrix: &SimilarityMatrix) -> Result<String> {
    let mut writer = report_writer(None);
    let header = std::iter::once(MATRIX_CORNER).chain(matrix.columns.iter().map(String::as_str));
    writer.write_record(header)?;

    for (row, scores) in matrix.rows.iter().zip(&matrix.scores) {
        let cells = scores.iter().map(|value| value.map(score).unwrap_or_default());
        writer.write_record(std::iter::once(row.clone()).chain(cells))?;
    }
    finish(writer)
}

/// Render the predictions report.
///
/// Only documents that were actually classified get a row.
pub fn render_predictions(documents: &[ClassifiedDocument]) -> Result<String> {
    let mut writer = report_writer(Some(PREDICTIONS_HEADER));
    for document in documents {
        if let Classification::Predicted(prediction) = &document.classification {
            writer.write_record([
                document.identifier.as_str(),
                prediction.label.as_str(),
                score(prediction.score).as_str(),
                prediction.top_neighbor.as_str(),
            ])?;
        }
    }
    finish(writer)
}

/// Write a rendered report, replacing any previous file atomically.
pub async fn write_report(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("csv.tmp");
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await?;

    info!("Report saved to {}", path.display());
    Ok(())
}
