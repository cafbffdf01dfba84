use anyhow::Result;
use center_target::{
    dataset::{load_classes_file, AnnotationStore, CocoDataset, ImageCrateDecoder},
    EncoderConfig, Split, TargetEncoderInit,
};
use image::{Rgb, RgbImage};
use std::{fs, num::NonZeroUsize};

#[tokio::test]
async fn encode_coco_samples() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image_dir = dir.path().join("images");
    fs::create_dir(&image_dir)?;
    RgbImage::from_pixel(160, 120, Rgb([40, 80, 120])).save(image_dir.join("a.png"))?;
    RgbImage::from_pixel(100, 100, Rgb([0, 0, 0])).save(image_dir.join("b.png"))?;

    let annotation_file = dir.path().join("instances.json");
    fs::write(
        &annotation_file,
        r#"{
            "images": [
                {"id": 4, "file_name": "a.png", "height": 120, "width": 160},
                {"id": 5, "file_name": "b.png", "height": 100, "width": 100}
            ],
            "annotations": [
                {"id": 1, "image_id": 4, "category_id": 3, "bbox": [20, 10, 80, 90],
                 "segmentation": [[20, 10, 100, 10, 100, 100, 20, 100]]},
                {"id": 2, "image_id": 4, "category_id": 2, "bbox": [0, 0, 30, 30],
                 "segmentation": [[0, 0, 30, 0, 30, 30, 0, 30]]},
                {"id": 3, "image_id": 5, "category_id": 2, "bbox": [0, 0, 99, 99],
                 "segmentation": {"size": [90, 90], "counts": [0, 8100]}}
            ],
            "categories": [
                {"id": 2, "name": "cat"},
                {"id": 3, "name": "dog"}
            ]
        }"#,
    )?;
    let classes_file = dir.path().join("classes.txt");
    fs::write(&classes_file, "cat\ndog\n")?;

    let classes = load_classes_file(&classes_file).await?;
    let dataset = CocoDataset::load(&annotation_file, &image_dir, classes).await?;
    assert_eq!(dataset.image_ids(), &[4, 5]);

    let mut config = EncoderConfig::new(NonZeroUsize::new(2).unwrap());
    config.input_h = 128;
    config.input_w = 128;
    let encoder = TargetEncoderInit {
        config,
        split: Split::Test,
        num_samples: dataset.num_samples(),
    }
    .build()?;

    let bundle = encoder.encode_index(&dataset, &ImageCrateDecoder, 0)?;
    assert_eq!(bundle.num_objects, 2);
    assert_eq!(bundle.input.dim(), (3, 128, 128));
    let meta = bundle.meta.as_ref().unwrap();
    assert_eq!(meta.image_id, 4);
    assert_eq!(meta.gt_det.dim(), (2, 6));
    assert_eq!(meta.gt_det[[0, 5]], 1.0);
    assert_eq!(meta.gt_det[[1, 5]], 0.0);

    // the RLE size does not match the image
    assert!(encoder.encode_index(&dataset, &ImageCrateDecoder, 1).is_err());
    assert!(encoder.encode_index(&dataset, &ImageCrateDecoder, 2).is_err());

    let histogram = dataset.class_histogram();
    assert_eq!(histogram["cat"], 2);
    assert_eq!(histogram["dog"], 1);
    Ok(())
}
