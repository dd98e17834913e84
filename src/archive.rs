use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use zip::write::SimpleFileOptions;

/// Zips the regular files directly inside `source_dir` into `archive_path`.
///
/// Entries are written in byte-wise file-name order with a fixed timestamp,
/// so the same inputs always produce the same archive. Subdirectories are
/// skipped. The archive is assembled under a temporary name next to the
/// destination and renamed into place only once complete; an existing file at
/// `archive_path` is never replaced.
pub fn build_archive(source_dir: &Path, archive_path: &Path) -> anyhow::Result<usize> {
    let files = list_entry_files(source_dir)?;

    if archive_path.exists() {
        anyhow::bail!("archive already exists: {}", archive_path.display());
    }
    let parent = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid archive path: {}", archive_path.display()))?;

    let tmp_path = parent.join(format!(".{file_name}.tmp.{}", uuid::Uuid::new_v4().simple()));
    let result = write_archive(&files, &tmp_path).and_then(|()| {
        promote(&tmp_path, archive_path)
            .with_context(|| format!("move archive into place: {}", archive_path.display()))
    });

    if result.is_err()
        && let Err(err) = fs::remove_file(&tmp_path)
        && err.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(path = %tmp_path.display(), ?err, "failed to remove partial archive");
    }

    result.map(|()| files.len())
}

/// Entry names of an archive in stored order.
pub fn entry_names(archive_path: &Path) -> anyhow::Result<Vec<String>> {
    let file = File::open(archive_path)
        .with_context(|| format!("open archive: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("read archive: {}", archive_path.display()))?;

    let mut names = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let entry = archive
            .by_index(idx)
            .with_context(|| format!("read archive entry #{idx}"))?;
        names.push(entry.name().to_owned());
    }
    Ok(names)
}

fn list_entry_files(source_dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut entries = fs::read_dir(source_dir)
        .with_context(|| format!("read dir: {}", source_dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("list dir: {}", source_dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let file_type = entry.file_type().context("read file type")?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((name, entry.path()));
    }
    Ok(files)
}

fn write_archive(files: &[(String, PathBuf)], out_path: &Path) -> anyhow::Result<()> {
    let out_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(out_path)
        .with_context(|| format!("create archive: {}", out_path.display()))?;
    let mut zip = zip::ZipWriter::new(out_file);

    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    for (name, path) in files {
        let mut f = File::open(path).with_context(|| format!("open: {}", path.display()))?;
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("zip start_file: {name}"))?;
        io::copy(&mut f, &mut zip).with_context(|| format!("zip write: {name}"))?;
    }

    let out_file = zip.finish().context("zip finish")?;
    out_file.sync_all().context("sync archive")?;
    Ok(())
}

fn promote(tmp_path: &Path, final_path: &Path) -> io::Result<()> {
    // hard_link fails if the destination exists, unlike rename.
    match fs::hard_link(tmp_path, final_path) {
        Ok(()) => fs::remove_file(tmp_path),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(err),
        Err(_) => {
            if final_path.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("archive already exists: {}", final_path.display()),
                ));
            }
            fs::rename(tmp_path, final_path)
        }
    }
}
