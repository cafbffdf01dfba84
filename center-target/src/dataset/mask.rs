//! Instance mask formats and rasterization.

use crate::common::*;
use bbox::HW;

/// An instance mask in the COCO annotation shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    /// Polygons of `[x0, y0, x1, y1, ...]` in image pixels.
    Polygons(Vec<Vec<f64>>),
    Rle(Rle),
}

/// A run-length encoded mask. Runs alternate between 0 and 1, starting with
/// 0, and scan the image column by column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rle {
    /// `[height, width]`
    pub size: [usize; 2],
    pub counts: RleCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RleCounts {
    Raw(Vec<u64>),
    /// The LEB128-like ASCII encoding.
    Compressed(String),
}

impl Segmentation {
    /// Rasterizes the mask into a `[H, W]` array of 0 and 1.
    pub fn rasterize(&self, size: &HW<usize>) -> Result<Array2<u8>> {
        match self {
            Self::Polygons(polygons) => {
                let mut mask = Array2::zeros((size.h(), size.w()));
                polygons
                    .iter()
                    .enumerate()
                    .try_for_each(|(index, polygon)| -> Result<_> {
                        fill_polygon(&mut mask, polygon)
                            .with_context(|| format!("malformed polygon at index {}", index))
                    })?;
                Ok(mask)
            }
            Self::Rle(rle) => rle.decode(size),
        }
    }
}

impl Rle {
    /// Decodes the runs into a `[H, W]` mask, checking the recorded size against `size`.
    pub fn decode(&self, size: &HW<usize>) -> Result<Array2<u8>> {
        let [height, width] = self.size;
        ensure!(
            height == size.h() && width == size.w(),
            "RLE size {}x{} does not match the image size {}x{}",
            height,
            width,
            size.h(),
            size.w()
        );

        let counts = match &self.counts {
            RleCounts::Raw(counts) => counts.clone(),
            RleCounts::Compressed(text) => decompress_counts(text)?,
        };

        let total = height * width;
        let covered = counts
            .iter()
            .try_fold(0u64, |sum, &count| sum.checked_add(count))
            .ok_or_else(|| format_err!("RLE run lengths overflow"))?;
        ensure!(
            covered == total as u64,
            "RLE runs cover {} pixels, but the mask has {} pixels",
            covered,
            total
        );

        // column-major
        let mut mask = Array2::zeros((width, height));
        {
            let flat = mask
                .as_slice_mut()
                .ok_or_else(|| format_err!("mask buffer is not contiguous"))?;
            let mut offset = 0;
            for (index, &count) in counts.iter().enumerate() {
                let count = count as usize;
                if index % 2 == 1 {
                    flat[offset..(offset + count)].fill(1);
                }
                offset += count;
            }
        }

        Ok(mask.reversed_axes().as_standard_layout().into_owned())
    }
}

fn decompress_counts(text: &str) -> Result<Vec<u64>> {
    let mut counts: Vec<i64> = vec![];
    let mut bytes = text.bytes().peekable();

    while bytes.peek().is_some() {
        let mut value: i64 = 0;
        let mut shift = 0;

        loop {
            let byte = bytes
                .next()
                .ok_or_else(|| format_err!("truncated RLE string"))?;
            ensure!(
                (48..48 + 64).contains(&byte),
                "invalid character {:?} in RLE string",
                byte as char
            );
            ensure!(shift < 60, "RLE count overflows");

            let chunk = (byte - 48) as i64;
            value |= (chunk & 0x1f) << shift;
            shift += 5;

            if chunk & 0x20 == 0 {
                if chunk & 0x10 != 0 {
                    value |= -1 << shift;
                }
                break;
            }
        }

        // counts after the first pair are deltas of the count two runs before
        if counts.len() > 2 {
            value += counts[counts.len() - 2];
        }
        counts.push(value);
    }

    counts
        .into_iter()
        .map(|count| {
            ensure!(count >= 0, "negative RLE count {}", count);
            Ok(count as u64)
        })
        .collect()
}

/// Fills one polygon by the even-odd rule, sampling at pixel centers.
fn fill_polygon(mask: &mut Array2<u8>, coords: &[f64]) -> Result<()> {
    ensure!(
        coords.len() % 2 == 0,
        "polygon has an odd number of coordinates"
    );
    ensure!(coords.len() >= 6, "polygon has fewer than 3 points");
    ensure!(
        coords.iter().all(|value| value.is_finite()),
        "polygon has non-finite coordinates"
    );

    let (height, width) = mask.dim();
    let points: Vec<[f64; 2]> = coords.chunks(2).map(|xy| [xy[0], xy[1]]).collect();
    let edges: Vec<_> = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(&lhs, &rhs)| (lhs, rhs))
        .collect();

    for row in 0..height {
        let y = row as f64 + 0.5;
        let mut crossings: Vec<f64> = edges
            .iter()
            .filter(|([_, y0], [_, y1])| (*y0 <= y) != (*y1 <= y))
            .map(|&([x0, y0], [x1, y1])| x0 + (y - y0) * (x1 - x0) / (y1 - y0))
            .collect();
        crossings.sort_by(|lhs, rhs| lhs.total_cmp(rhs));

        for (&enter, &leave) in crossings.iter().tuples() {
            let begin = (enter - 0.5).ceil().max(0.0) as usize;
            let end = ((leave - 0.5).ceil().max(0.0) as usize).min(width);
            if begin < end {
                mask.slice_mut(s![row, begin..end]).fill(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_polygon() -> Result<()> {
        let segmentation = Segmentation::Polygons(vec![vec![1.0, 1.0, 5.0, 1.0, 5.0, 4.0, 1.0, 4.0]]);
        let mask = segmentation.rasterize(&HW::from_hw([6, 8]))?;

        assert_eq!(mask.sum(), 12);
        assert_eq!(mask[[1, 1]], 1);
        assert_eq!(mask[[3, 4]], 1);
        assert_eq!(mask[[4, 4]], 0);
        assert_eq!(mask[[1, 5]], 0);
        Ok(())
    }

    #[test]
    fn polygons_are_unioned_and_clipped() -> Result<()> {
        let segmentation = Segmentation::Polygons(vec![
            vec![-2.0, -2.0, 3.0, -2.0, 3.0, 3.0, -2.0, 3.0],
            vec![2.0, 2.0, 10.0, 2.0, 10.0, 4.0, 2.0, 4.0],
        ]);
        let mask = segmentation.rasterize(&HW::from_hw([4, 4]))?;

        assert_eq!(mask.row(0).to_vec(), vec![1, 1, 1, 0]);
        assert_eq!(mask.row(2).to_vec(), vec![1, 1, 1, 1]);
        assert_eq!(mask.row(3).to_vec(), vec![0, 0, 1, 1]);
        Ok(())
    }

    #[test]
    fn malformed_polygons() {
        let size = HW::from_hw([4, 4]);
        let odd = Segmentation::Polygons(vec![vec![0.0, 0.0, 1.0, 1.0, 2.0]]);
        let short = Segmentation::Polygons(vec![vec![0.0, 0.0, 1.0, 1.0]]);
        assert!(odd.rasterize(&size).is_err());
        assert!(short.rasterize(&size).is_err());
    }

    #[test]
    fn raw_rle_is_column_major() -> Result<()> {
        let rle = Rle {
            size: [2, 3],
            counts: RleCounts::Raw(vec![1, 2, 3]),
        };
        let mask = rle.decode(&HW::from_hw([2, 3]))?;
        assert_eq!(mask, ndarray::arr2(&[[0u8, 1, 0], [1, 0, 0]]));

        assert!(rle.decode(&HW::from_hw([3, 2])).is_err());

        let overflow = Rle {
            size: [2, 3],
            counts: RleCounts::Raw(vec![4, 4]),
        };
        assert!(overflow.decode(&HW::from_hw([2, 3])).is_err());

        let short = Rle {
            size: [2, 3],
            counts: RleCounts::Raw(vec![1, 2]),
        };
        assert!(short.decode(&HW::from_hw([2, 3])).is_err());
        Ok(())
    }

    #[test]
    fn huge_rle_runs_are_rejected() {
        let rle = Rle {
            size: [2, 3],
            counts: RleCounts::Raw(vec![u64::MAX, 2]),
        };
        assert!(rle.decode(&HW::from_hw([2, 3])).is_err());

        // wraps to 6 under unchecked addition
        let wrapping = Rle {
            size: [2, 3],
            counts: RleCounts::Raw(vec![u64::MAX - 1, 8]),
        };
        assert!(wrapping.decode(&HW::from_hw([2, 3])).is_err());
    }

    #[test]
    fn compressed_rle() -> Result<()> {
        // runs 1, 2, 3, 4 where the last is stored as a delta of +2 over the second
        let rle = Rle {
            size: [2, 5],
            counts: RleCounts::Compressed("1232".into()),
        };
        let mask = rle.decode(&HW::from_hw([2, 5]))?;
        assert_eq!(mask.sum(), 6);
        assert_eq!(mask, ndarray::arr2(&[[0u8, 1, 0, 1, 1], [1, 0, 0, 1, 1]]));
        Ok(())
    }

    #[test]
    fn segmentation_json_shapes() -> Result<()> {
        let polygons: Segmentation = serde_json::from_str("[[0, 0, 4, 0, 4, 4]]")?;
        assert!(matches!(polygons, Segmentation::Polygons(_)));

        let raw: Segmentation = serde_json::from_str(r#"{"size": [2, 3], "counts": [1, 2, 3]}"#)?;
        assert!(matches!(
            raw,
            Segmentation::Rle(Rle {
                counts: RleCounts::Raw(_),
                ..
            })
        ));

        let compressed: Segmentation = serde_json::from_str(r#"{"size": [2, 5], "counts": "1232"}"#)?;
        assert!(matches!(
            compressed,
            Segmentation::Rle(Rle {
                counts: RleCounts::Compressed(_),
                ..
            })
        ));
        Ok(())
    }
}
