pub mod eval;
pub mod train;

use std::path::Path;

use anyhow::Result;
use burn::data::dataset::vision::ImageFolderDataset;

/// Pair up `root/images/*.{jpg,jpeg,png}` with `root/masks/{stem}.png`.
pub fn load_segmentation_dataset(root: &Path, num_classes: usize) -> Result<ImageFolderDataset> {
    let images_dir = root.join("images");
    let masks_dir = root.join("masks");

    anyhow::ensure!(
        images_dir.is_dir(),
        "images directory does not exist: {}",
        images_dir.display()
    );
    anyhow::ensure!(
        masks_dir.is_dir(),
        "masks directory does not exist: {}",
        masks_dir.display()
    );

    let img_extensions = ["jpg", "jpeg", "png"];
    let mut image_mask_pairs = Vec::new();

    for entry in std::fs::read_dir(&images_dir)? {
        let path = entry?.path();

        if path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    img_extensions
                        .iter()
                        .any(|&valid_ext| valid_ext.eq_ignore_ascii_case(ext))
                })
        {
            if let Some(stem) = path.file_stem() {
                let mask_path = masks_dir.join(format!("{}.png", stem.to_string_lossy()));

                if mask_path.exists() {
                    image_mask_pairs.push((path, mask_path));
                }
            }
        }
    }

    let class_names: Vec<String> = (0..num_classes).map(|i| format!("class_{i}")).collect();

    ImageFolderDataset::new_segmentation_with_items(image_mask_pairs, &class_names)
        .map_err(|e| anyhow::anyhow!("failed to build dataset: {e}"))
}
