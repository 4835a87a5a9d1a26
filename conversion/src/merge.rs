use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::{debug, info};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Concatenate the pages of `inputs`, in order, into a new PDF at `output`.
///
/// Every input is loaded before anything is written, and the output only appears once it is complete.
///
/// # Returns
///
/// The page count of the merged document.
///
pub fn merge_pdfs(inputs: &[PathBuf], output: &Path) -> Result<usize, anyhow::Error> {
    if inputs.is_empty() {
        return Err(anyhow!("nothing to merge"));
    }
    let documents = inputs
        .iter()
        .map(|path| Document::load(path).with_context(|| format!("failed to open '{}'", path.display())))
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged = concatenate(documents)?;
    let page_count = merged.get_pages().len();
    info!("Merging {} files ({} pages) into '{}'", inputs.len(), page_count, output.display());

    let partial = output.with_extension("pdf.part");
    let written = merged
        .save(&partial)
        .with_context(|| format!("failed to write '{}'", partial.display()))
        .and_then(|_| {
            std::fs::rename(&partial, output)
                .with_context(|| format!("failed to move merged PDF to '{}'", output.display()))
        });
    if let Err(err) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(err);
    }
    Ok(page_count)
}

fn concatenate(documents: Vec<Document>) -> Result<Document, anyhow::Error> {
    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = vec![];
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        for page_id in doc.get_pages().into_values() {
            let mut page = doc
                .get_dictionary(page_id)
                .context("page is not a dictionary")?
                .clone();
            for key in INHERITABLE {
                if page.get(key).is_err() {
                    if let Some(value) = inherited(&doc, &page, key) {
                        page.set(key, value);
                    }
                }
            }
            pages.push((page_id, page));
        }

        for (id, object) in doc.objects {
            let tree_node = matches!(dictionary_type(&object), Some(b"Catalog" | b"Pages" | b"Page"));
            if !tree_node {
                objects.insert(id, object);
            }
        }
    }
    debug!("Collected {} pages and {} objects", pages.len(), objects.len());

    let mut merged = Document::with_version("1.5");
    merged.objects = objects;

    let pages_id = (max_id, 0);
    let catalog_id = (max_id + 1, 0);
    let mut kids = Vec::with_capacity(pages.len());
    let count = pages.len() as i64;
    for (id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(id, Object::Dictionary(page));
        kids.push(Object::Reference(id));
    }
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    merged.trailer.set("Root", catalog_id);
    merged.max_id = catalog_id.0;
    merged.renumber_objects();
    merged.compress();
    Ok(merged)
}

/// Looks `key` up along the `Parent` chain of `page`.
///
fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded in case of a cyclic page tree.
    for _ in 0..64 {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn dictionary_type(object: &Object) -> Option<&[u8]> {
    object.as_dict().ok()?.get(b"Type").ok()?.as_name().ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_pages_concatenated_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("Q3 Report_email.pdf");
        let sheet = dir.path().join("data.pdf");
        let scan = dir.path().join("scan.pdf");
        test_utils::write_pdf(&body, "body", 1);
        test_utils::write_pdf(&sheet, "sheet", 2);
        test_utils::write_pdf(&scan, "scan", 3);
        let output = dir.path().join("Q3 Report.pdf");

        let pages = merge_pdfs(&[body, sheet, scan], &output).unwrap();

        assert_eq!(pages, 6);
        assert_eq!(
            test_utils::pdf_page_labels(&output),
            vec!["body 1", "sheet 1", "sheet 2", "scan 1", "scan 2", "scan 3"]
        );
    }

    #[test]
    fn test_inherited_media_box_copied_to_pages() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        test_utils::write_pdf(&input, "x", 2);
        let output = dir.path().join("out.pdf");

        merge_pdfs(&[input], &output).unwrap();

        let doc = Document::load(&output).unwrap();
        for page_id in doc.get_pages().into_values() {
            let page = doc.get_dictionary(page_id).unwrap();
            assert!(page.get(b"MediaBox").is_ok());
            assert!(page.get(b"Resources").is_ok());
        }
    }

    #[test]
    fn test_output_may_replace_an_input() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("Scan_email.pdf");
        let scan = dir.path().join("Scan.pdf");
        test_utils::write_pdf(&body, "body", 1);
        test_utils::write_pdf(&scan, "scan", 1);

        assert_eq!(merge_pdfs(&[body, scan.clone()], &scan).unwrap(), 2);
        assert_eq!(test_utils::pdf_page_labels(&scan), vec!["body 1", "scan 1"]);
    }

    #[test]
    fn test_unreadable_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.pdf");
        let broken = dir.path().join("broken.pdf");
        test_utils::write_pdf(&body, "body", 1);
        std::fs::write(&broken, b"%PDF-1.5 truncated").unwrap();
        let output = dir.path().join("out.pdf");

        let err = merge_pdfs(&[body, broken], &output).unwrap_err();

        assert!(err.to_string().contains("broken.pdf"));
        assert!(!output.exists());
        assert!(!dir.path().join("out.pdf.part").exists());
    }

    #[test]
    fn test_no_inputs() {
        let dir = tempfile::tempdir().unwrap();

        assert!(merge_pdfs(&[], &dir.path().join("out.pdf")).is_err());
    }
}
