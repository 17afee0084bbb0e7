use knot::areas::repository::Repository;
use knot::artifacts::objects::object_id::ObjectId;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::common::file::write_file;

/// Output sink that can be read back after the repository wrote to it
#[derive(Debug, Clone, Default)]
pub struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub fn contents(&self) -> String {
        let buffer = self.0.lock().expect("output lock poisoned");
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("output lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn configure_author(repository: &Repository) {
    repository
        .update_config(|config| {
            config.user.name = Some("fake_user".to_string());
            config.user.email = Some("fake_email@email.com".to_string());
            Ok(())
        })
        .expect("Failed to configure author");
}

/// A fresh working repository at `path`
pub async fn init_repository(path: &Path) -> (Repository, Output) {
    let output = Output::default();
    let repository = Repository::new(path, Box::new(output.clone())).expect("Failed to create repository");
    repository.init(None).await.expect("Failed to init repository");
    configure_author(&repository);
    (repository, output)
}

/// A fresh bare repository at `path`
pub async fn init_bare_repository(path: &Path) -> Repository {
    let repository = Repository::new_bare(path, Box::new(std::io::sink())).expect("Failed to create repository");
    repository.init(None).await.expect("Failed to init repository");
    repository
}

pub fn open_repository(path: &Path) -> (Repository, Output) {
    let output = Output::default();
    let repository = Repository::open(path, Box::new(output.clone())).expect("Failed to open repository");
    configure_author(&repository);
    (repository, output)
}

/// Write the files, stage everything and commit
pub async fn commit_files(repository: &Repository, files: &[(&str, &str)], message: &str) -> ObjectId {
    for (path, content) in files {
        write_file(repository.path(), path, content);
    }
    repository
        .add(&[".".into()])
        .await
        .expect("Failed to stage files");
    repository.commit(Some(message)).await.expect("Failed to commit")
}

pub fn head(repository: &Repository) -> Option<ObjectId> {
    repository.refs().read_head().expect("Failed to read HEAD")
}
