use super::{Annotation, AnnotationStore, ClassAnnotation, ImageMeta, Segmentation};
use crate::common::*;

/// The annotation file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CocoFile {
    images: Vec<CocoImage>,
    annotations: Vec<CocoAnnotation>,
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    height: usize,
    width: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,
    bbox: [f64; 4],
    #[serde(default = "empty_segmentation")]
    segmentation: Segmentation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

fn empty_segmentation() -> Segmentation {
    Segmentation::Polygons(vec![])
}

/// COCO dataset loader options.
#[derive(Debug, Clone)]
pub struct CocoDatasetInit {
    pub annotation_file: PathBuf,
    pub image_dir: PathBuf,
    /// Class names in class index order.
    pub classes: IndexSet<String>,
    /// Images are kept only if one of their first `max_objects` annotations
    /// with a listed class covers at least this many pixels.
    pub min_object_area: f64,
    pub max_objects: usize,
}

impl CocoDatasetInit {
    pub async fn load(self) -> Result<CocoDataset> {
        let Self {
            annotation_file,
            image_dir,
            classes,
            min_object_area,
            max_objects,
        } = self;
        ensure!(!classes.is_empty(), "the class list is empty");

        let text = tokio::fs::read_to_string(&annotation_file)
            .await
            .with_context(|| {
                format!(
                    "unable to read annotation file '{}'",
                    annotation_file.display()
                )
            })?;
        let CocoFile {
            images,
            annotations,
            categories,
        } = serde_json::from_str(&text).with_context(|| {
            format!(
                "unable to parse annotation file '{}'",
                annotation_file.display()
            )
        })?;

        // map category ids to class indexes
        let category_to_class: HashMap<u64, usize> = categories
            .iter()
            .filter_map(|category| {
                let class = classes.get_index_of(&category.name)?;
                Some((category.id, class))
            })
            .collect();

        // sanity check
        {
            let category_names: HashSet<_> = categories.iter().map(|cat| &cat.name).collect();
            let missing: Vec<_> = classes
                .iter()
                .filter(|name| !category_names.contains(name))
                .collect();
            if !missing.is_empty() {
                warn!(
                    "these classes are not defined in '{}': {:?}",
                    annotation_file.display(),
                    missing
                );
            }
        }

        let images: IndexMap<u64, ImageMeta> = images
            .into_iter()
            .map(|image| {
                let CocoImage {
                    id,
                    file_name,
                    height,
                    width,
                } = image;
                (
                    id,
                    ImageMeta {
                        id,
                        file_name,
                        height,
                        width,
                    },
                )
            })
            .collect();

        let mut grouped: HashMap<u64, Vec<(Annotation, Option<usize>)>> = HashMap::new();
        for ann in annotations {
            ensure!(
                images.contains_key(&ann.image_id),
                "annotation {} refers to unknown image {}",
                ann.id,
                ann.image_id
            );
            let class = category_to_class.get(&ann.category_id).copied();
            let CocoAnnotation {
                id,
                image_id,
                category_id,
                bbox,
                segmentation,
            } = ann;
            grouped.entry(image_id).or_default().push((
                Annotation {
                    id,
                    image_id,
                    category_id,
                    bbox,
                    segmentation,
                },
                class,
            ));
        }

        // keep images with a large enough object among the leading annotations
        let image_ids: Vec<u64> = images
            .keys()
            .copied()
            .filter(|image_id| {
                grouped.get(image_id).map_or(false, |anns| {
                    anns.iter()
                        .take(max_objects)
                        .filter(|(_, class)| class.is_some())
                        .any(|(ann, _)| ann.bbox[2] * ann.bbox[3] >= min_object_area)
                })
            })
            .collect();

        let annotations: HashMap<u64, Vec<(Annotation, usize)>> = grouped
            .into_iter()
            .map(|(image_id, anns)| {
                let anns: Vec<_> = anns
                    .into_iter()
                    .filter_map(|(ann, class)| Some((ann, class?)))
                    .collect();
                (image_id, anns)
            })
            .collect();

        info!(
            "loaded {} of {} images from '{}'",
            image_ids.len(),
            images.len(),
            annotation_file.display()
        );

        Ok(CocoDataset {
            image_dir,
            classes,
            category_to_class,
            images,
            annotations,
            image_ids,
        })
    }
}

/// A COCO instance annotation file restricted to a class list.
#[derive(Debug, Clone)]
pub struct CocoDataset {
    image_dir: PathBuf,
    classes: IndexSet<String>,
    category_to_class: HashMap<u64, usize>,
    images: IndexMap<u64, ImageMeta>,
    annotations: HashMap<u64, Vec<(Annotation, usize)>>,
    image_ids: Vec<u64>,
}

impl CocoDataset {
    /// Loads with the default object filter of 50x50 pixels over the first 128 annotations.
    pub async fn load(
        annotation_file: impl AsRef<Path>,
        image_dir: impl AsRef<Path>,
        classes: IndexSet<String>,
    ) -> Result<Self> {
        CocoDatasetInit {
            annotation_file: annotation_file.as_ref().to_owned(),
            image_dir: image_dir.as_ref().to_owned(),
            classes,
            min_object_area: 50.0 * 50.0,
            max_objects: 128,
        }
        .load()
        .await
    }

    pub fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }

    /// The class index of a category id, if the category is listed.
    pub fn class_of(&self, category_id: u64) -> Option<usize> {
        self.category_to_class.get(&category_id).copied()
    }

    pub fn num_samples(&self) -> usize {
        self.image_ids.len()
    }

    /// Counts the listed-class annotations of kept images per class.
    pub fn class_histogram(&self) -> IndexMap<&str, usize> {
        let mut histogram: IndexMap<&str, usize> = self
            .classes
            .iter()
            .map(|name| (name.as_str(), 0))
            .collect();

        self.image_ids
            .iter()
            .filter_map(|image_id| self.annotations.get(image_id))
            .flatten()
            .for_each(|(_, class)| {
                if let Some((_, count)) = histogram.get_index_mut(*class) {
                    *count += 1;
                }
            });

        histogram
    }
}

impl AnnotationStore for CocoDataset {
    fn image_ids(&self) -> &[u64] {
        &self.image_ids
    }

    fn annotations(&self, image_id: u64) -> Result<Vec<ClassAnnotation<'_>>> {
        ensure!(
            self.images.contains_key(&image_id),
            "image id {} does not exist",
            image_id
        );
        let anns = self
            .annotations
            .get(&image_id)
            .map(|anns| {
                anns.iter()
                    .map(|(annotation, class)| ClassAnnotation {
                        annotation,
                        class: *class,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(anns)
    }

    fn image_metadata(&self, image_id: u64) -> Result<&ImageMeta> {
        self.images
            .get(&image_id)
            .ok_or_else(|| format_err!("image id {} does not exist", image_id))
    }

    fn image_path(&self, image_id: u64) -> Result<PathBuf> {
        let meta = self.image_metadata(image_id)?;
        Ok(self.image_dir.join(&meta.file_name))
    }
}

/// Reads one class name per line. Blank lines are ignored.
pub async fn load_classes_file(path: impl AsRef<Path>) -> Result<IndexSet<String>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("unable to read classes file '{}'", path.display()))?;
    let lines: Vec<_> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let classes: IndexSet<_> = lines.iter().map(|&line| line.to_owned()).collect();
    ensure!(
        lines.len() == classes.len(),
        "duplicated class names found in '{}'",
        path.display()
    );
    ensure!(
        !classes.is_empty(),
        "no classes found in '{}'",
        path.display()
    );
    Ok(classes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ANNOTATIONS: &str = r#"{
        "images": [
            {"id": 1, "file_name": "a.jpg", "height": 100, "width": 120},
            {"id": 2, "file_name": "b.jpg", "height": 100, "width": 120},
            {"id": 3, "file_name": "c.jpg", "height": 100, "width": 120}
        ],
        "annotations": [
            {"id": 10, "image_id": 1, "category_id": 7, "bbox": [0, 0, 60, 60],
             "segmentation": [[0, 0, 60, 0, 60, 60, 0, 60]]},
            {"id": 11, "image_id": 1, "category_id": 1, "bbox": [5, 5, 10, 10],
             "segmentation": {"size": [100, 120], "counts": [0, 10000, 2000]}},
            {"id": 12, "image_id": 2, "category_id": 9, "bbox": [0, 0, 80, 80],
             "segmentation": [[0, 0, 80, 0, 80, 80]]},
            {"id": 13, "image_id": 3, "category_id": 1, "bbox": [0, 0, 20, 20],
             "segmentation": [[0, 0, 20, 0, 20, 20]]}
        ],
        "categories": [
            {"id": 1, "name": "person"},
            {"id": 7, "name": "dog"},
            {"id": 9, "name": "car"}
        ]
    }"#;

    fn classes() -> IndexSet<String> {
        ["person", "dog", "zebra"]
            .iter()
            .map(|&name| name.to_owned())
            .collect()
    }

    #[tokio::test]
    async fn load_filters_images_and_classes() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(ANNOTATIONS.as_bytes())?;

        let dataset = CocoDataset::load(file.path(), "/data/images", classes()).await?;

        assert_eq!(dataset.image_ids(), &[1]);
        assert_eq!(dataset.class_of(7), Some(1));
        assert_eq!(dataset.class_of(9), None);

        let anns = dataset.annotations(1)?;
        let summary: Vec<_> = anns
            .iter()
            .map(|ann| (ann.annotation.id, ann.class))
            .collect();
        assert_eq!(summary, [(10, 1), (11, 0)]);
        assert_eq!(
            dataset.image_path(1)?,
            Path::new("/data/images").join("a.jpg")
        );

        let mask = dataset.rasterize_mask(anns[0].annotation)?;
        assert_eq!(mask.dim(), (100, 120));
        assert_eq!(mask.iter().map(|&value| value as usize).sum::<usize>(), 3600);

        let histogram = dataset.class_histogram();
        assert_eq!(
            histogram.into_iter().collect::<Vec<_>>(),
            [("person", 1), ("dog", 1), ("zebra", 0)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn load_rejects_dangling_annotation() -> Result<()> {
        let text = r#"{
            "images": [],
            "annotations": [{"id": 1, "image_id": 5, "category_id": 1, "bbox": [0, 0, 1, 1]}],
            "categories": [{"id": 1, "name": "person"}]
        }"#;
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(text.as_bytes())?;

        assert!(CocoDataset::load(file.path(), "images", classes())
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn classes_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "person\n\ndog")?;
        let classes = load_classes_file(file.path()).await?;
        assert_eq!(classes.iter().collect::<Vec<_>>(), ["person", "dog"]);

        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "person\nperson")?;
        assert!(load_classes_file(file.path()).await.is_err());
        Ok(())
    }
}
