#![allow(dead_code)]

pub mod fakes {
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use conversion::{
        AttachmentFailurePolicy, Converter, DocumentRenderer, MemoryAuditLog, PreviewLease, Previewer,
        QueueTable, RetryPolicy, Session, Workspace,
    };
    use mail::{Attachment, BodyFormat, MailItem, SaveError};

    /// An email whose body save can be scripted to fail.
    pub struct FakeEmail {
        pub subject: Option<String>,
        pub attachments: Vec<Attachment>,
        transient_failures: AtomicU32,
        permanent: bool,
        pub save_calls: AtomicU32,
    }

    impl FakeEmail {
        pub fn new(subject: &str) -> Self {
            Self {
                subject: Some(subject.to_string()),
                attachments: vec![],
                transient_failures: AtomicU32::new(0),
                permanent: false,
                save_calls: AtomicU32::new(0),
            }
        }

        pub fn without_subject() -> Self {
            Self { subject: None, ..Self::new("") }
        }

        pub fn attach(mut self, name: &str, contents: impl Into<Vec<u8>>) -> Self {
            self.attachments.push(Attachment::new(Some(name), contents));
            self
        }

        pub fn failing_transiently(self, times: u32) -> Self {
            self.transient_failures.store(times, Ordering::SeqCst);
            self
        }

        pub fn failing_permanently(mut self) -> Self {
            self.permanent = true;
            self
        }

        pub fn save_calls(&self) -> u32 {
            self.save_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MailItem for FakeEmail {
        fn subject(&self) -> Option<&str> {
            self.subject.as_deref()
        }

        fn attachments(&self) -> &[Attachment] {
            &self.attachments
        }

        async fn save_body_as(&self, path: &Path, _format: BodyFormat) -> Result<(), SaveError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(SaveError::Permanent(anyhow!("message was deleted")));
            }
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                std::fs::write(path, b"<html><body>partial").map_err(SaveError::from_io)?;
                return Err(SaveError::Transient(anyhow!("mail store busy")));
            }
            std::fs::write(path, b"<html><body><p>Hello</p></body></html>").map_err(SaveError::from_io)?;
            Ok(())
        }
    }

    /// Writes a PDF labelled with the input's file stem next to the input.
    ///
    /// Inputs render to one page unless configured otherwise.
    #[derive(Default)]
    pub struct FakeRenderer {
        pages: Mutex<HashMap<String, usize>>,
        failing: Mutex<HashSet<String>>,
        inputs: Mutex<Vec<PathBuf>>,
    }

    impl FakeRenderer {
        pub fn set_pages(&self, file_name: &str, pages: usize) {
            self.pages.lock().unwrap().insert(file_name.to_string(), pages);
        }

        pub fn fail_on(&self, file_name: &str) {
            self.failing.lock().unwrap().insert(file_name.to_string());
        }

        pub fn inputs(&self) -> Vec<PathBuf> {
            self.inputs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentRenderer for FakeRenderer {
        async fn render_to_pdf(&self, input_path: &Path) -> Result<PathBuf, anyhow::Error> {
            self.inputs.lock().unwrap().push(input_path.to_path_buf());
            let name = input_path.file_name().unwrap().to_string_lossy().to_string();
            if self.failing.lock().unwrap().contains(&name) {
                return Err(anyhow!("cannot open '{}'", name));
            }
            let pages = self.pages.lock().unwrap().get(&name).copied().unwrap_or(1);
            let label = input_path.file_stem().unwrap().to_string_lossy().to_string();
            let output = input_path.with_extension("pdf");
            test_utils::write_pdf(&output, &label, pages);
            Ok(output)
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    /// Records which artifacts were previewed and how many previews were closed.
    #[derive(Default)]
    pub struct RecordingPreviewer {
        opened: Mutex<Vec<PathBuf>>,
        released: Arc<AtomicUsize>,
    }

    impl RecordingPreviewer {
        pub fn opened(&self) -> Vec<PathBuf> {
            self.opened.lock().unwrap().clone()
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    struct RecordingLease(Arc<AtomicUsize>);

    #[async_trait]
    impl PreviewLease for RecordingLease {
        async fn release(self: Box<Self>) -> Result<(), anyhow::Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl Previewer for RecordingPreviewer {
        async fn open(&self, path: &Path) -> Result<Box<dyn PreviewLease>, anyhow::Error> {
            self.opened.lock().unwrap().push(path.to_path_buf());
            Ok(Box::new(RecordingLease(self.released.clone())))
        }
    }

    /// A temporary root holding the working directory and three queue directories.
    pub struct Harness {
        pub root: TempDir,
        pub workspace: Workspace,
        pub queues: Vec<PathBuf>,
        pub audit: Arc<MemoryAuditLog>,
        pub body: Arc<FakeRenderer>,
        pub documents: Arc<FakeRenderer>,
        pub previewer: Arc<RecordingPreviewer>,
    }

    impl Harness {
        pub fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let workspace = Workspace::new(root.path());
            let queues: Vec<PathBuf> = (1..=3).map(|n| root.path().join(format!("queue{}", n))).collect();
            for queue in &queues {
                std::fs::create_dir_all(queue).unwrap();
            }
            Self {
                root,
                workspace,
                queues,
                audit: Arc::new(MemoryAuditLog::default()),
                body: Arc::new(FakeRenderer::default()),
                documents: Arc::new(FakeRenderer::default()),
                previewer: Arc::new(RecordingPreviewer::default()),
            }
        }

        pub fn converter(&self, policy: AttachmentFailurePolicy) -> Converter {
            Converter::builder()
                .workspace(self.workspace.clone())
                .body_renderer(self.body.clone())
                .document_renderer(self.documents.clone())
                .retry(RetryPolicy { attempts: 3, delay: Duration::from_millis(2000) })
                .audit(self.audit.clone())
                .failure_policy(policy)
                .build()
        }

        pub fn session(&self) -> Session {
            self.session_with(AttachmentFailurePolicy::Abort)
        }

        pub fn session_with(&self, policy: AttachmentFailurePolicy) -> Session {
            Session::new(
                self.converter(policy),
                QueueTable::from_dirs(&self.queues),
                self.previewer.clone(),
            )
        }

        pub fn queue(&self, n: usize) -> &Path {
            &self.queues[n - 1]
        }

        /// File names currently in the working directory.
        pub fn workspace_files(&self) -> Vec<String> {
            super::assertions::file_names(self.workspace.dir())
        }
    }

    /// The bytes of a PDF with `pages` labelled pages.
    pub fn pdf_bytes(label: &str, pages: usize) -> Vec<u8> {
        let path = test_utils::temp_path().unwrap();
        test_utils::write_pdf(&path, label, pages);
        std::fs::read(&path).unwrap()
    }
}

pub mod assertions {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    /// Sorted names of the files in `dir`, or nothing if it does not exist.
    pub fn file_names(dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return vec![];
        };
        let mut names: Vec<String> = entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Every file below `dir` with its contents.
    pub fn tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    files.insert(path.clone(), vec![]);
                    pending.push(path);
                } else {
                    let contents = std::fs::read(&path).unwrap();
                    files.insert(path, contents);
                }
            }
        }
        files
    }
}
