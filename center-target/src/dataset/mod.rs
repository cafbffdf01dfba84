//! Annotation store and image decoding interfaces, and their COCO implementations.

mod coco_;
mod decoder;
mod mask;

pub use coco_::*;
pub use decoder::*;
pub use mask::*;

use crate::common::*;
use bbox::{prelude::*, HW, TLBR};
use label::Label;

/// An object annotation as recorded in the annotation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    /// `[x, y, w, h]` in image pixels.
    pub bbox: [f64; 4],
    pub segmentation: Segmentation,
}

impl Annotation {
    /// The box in `[t, l, b, r]` image coordinates.
    pub fn tlbr(&self) -> Result<TLBR<f64>> {
        let [x, y, w, h] = self.bbox;
        TLBR::try_from_tlhw([y, x, h, w])
            .with_context(|| format!("invalid box {:?} in annotation {}", self.bbox, self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub id: u64,
    pub file_name: String,
    pub height: usize,
    pub width: usize,
}

impl ImageMeta {
    pub fn size(&self) -> HW<usize> {
        HW::from_hw([self.height, self.width])
    }
}

/// An annotation whose category is mapped to a contiguous class index.
#[derive(Debug, Clone, Copy)]
pub struct ClassAnnotation<'a> {
    pub annotation: &'a Annotation,
    pub class: usize,
}

/// Read access to images and their annotations.
pub trait AnnotationStore
where
    Self: Send + Sync,
{
    /// The image ids in sample order.
    fn image_ids(&self) -> &[u64];

    /// The annotations of an image with a mapped class, in file order.
    fn annotations(&self, image_id: u64) -> Result<Vec<ClassAnnotation<'_>>>;

    fn image_metadata(&self, image_id: u64) -> Result<&ImageMeta>;

    /// The location of the image file.
    fn image_path(&self, image_id: u64) -> Result<PathBuf>;

    /// Rasterizes the annotation mask at the size of its image.
    fn rasterize_mask(&self, annotation: &Annotation) -> Result<Array2<u8>> {
        let meta = self.image_metadata(annotation.image_id)?;
        annotation
            .segmentation
            .rasterize(&meta.size())
            .with_context(|| format!("unable to rasterize annotation {}", annotation.id))
    }
}

/// Decodes image files.
pub trait ImageDecoder
where
    Self: Send + Sync,
{
    /// Returns an `[H, W, 3]` array in BGR channel order.
    fn decode(&self, path: &Path) -> Result<Array3<u8>>;
}

/// An annotated object of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleObject {
    /// The box in image pixels and the class index.
    pub label: Label<TLBR<f64>, usize>,
    /// `[H, W]` binary mask of the image size.
    pub mask: Array2<u8>,
}

/// A decoded image with its objects, the encoder input.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image_id: u64,
    /// `[H, W, 3]` BGR image.
    pub image: Array3<u8>,
    pub objects: Vec<SampleObject>,
}

impl Sample {
    /// Loads the sample at `index`, keeping at most `max_objects` objects.
    pub fn load<S, D>(store: &S, decoder: &D, index: usize, max_objects: usize) -> Result<Self>
    where
        S: AnnotationStore + ?Sized,
        D: ImageDecoder + ?Sized,
    {
        let image_ids = store.image_ids();
        let image_id = *image_ids.get(index).ok_or_else(|| {
            format_err!(
                "sample index {} is out of range for {} images",
                index,
                image_ids.len()
            )
        })?;

        let path = store.image_path(image_id)?;
        let image = decoder
            .decode(&path)
            .with_context(|| format!("unable to decode image '{}'", path.display()))?;

        let objects: Vec<_> = store
            .annotations(image_id)?
            .into_iter()
            .take(max_objects)
            .map(|ClassAnnotation { annotation, class }| -> Result<_> {
                let rect = annotation.tlbr()?;
                let mask = store.rasterize_mask(annotation)?;
                Ok(SampleObject {
                    label: Label { rect, class },
                    mask,
                })
            })
            .try_collect()
            .with_context(|| format!("invalid annotation in image {}", image_id))?;

        Ok(Self {
            image_id,
            image,
            objects,
        })
    }

    pub fn size(&self) -> HW<usize> {
        let (height, width, _) = self.image.dim();
        HW::from_hw([height, width])
    }
}
