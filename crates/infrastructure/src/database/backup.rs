use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const BACKUP_COUNT: usize = 8;

fn numbered(db_path: &Path, index: usize) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Shifts `db.1 .. db.{keep-1}` one slot down (dropping the oldest) and copies
/// the live file to `db.1`. Does nothing when the database file is absent.
pub fn rotate_backups(db_path: &Path, keep: usize) -> io::Result<Option<PathBuf>> {
    if !db_path.exists() {
        warn!(path = %db_path.display(), "no database file to back up");
        return Ok(None);
    }
    if keep == 0 {
        return Ok(None);
    }

    let oldest = numbered(db_path, keep);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for index in (1..keep).rev() {
        let from = numbered(db_path, index);
        if from.exists() {
            std::fs::rename(&from, numbered(db_path, index + 1))?;
        }
    }

    let newest = numbered(db_path, 1);
    std::fs::copy(db_path, &newest)?;
    debug!(backup = %newest.display(), "database backed up");
    Ok(Some(newest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn keeps_at_most_eight_copies_and_the_live_file() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("seedmgr.db");

        for generation in 0..11 {
            std::fs::write(&db, format!("gen{generation}")).unwrap();
            rotate_backups(&db, BACKUP_COUNT).unwrap();
        }

        assert_eq!(std::fs::read_to_string(&db).unwrap(), "gen10");
        assert_eq!(std::fs::read_to_string(numbered(&db, 1)).unwrap(), "gen10");
        assert_eq!(std::fs::read_to_string(numbered(&db, 8)).unwrap(), "gen3");
        assert!(!numbered(&db, 9).exists());

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 9);
    }

    #[test]
    fn missing_database_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let result = rotate_backups(&dir.path().join("absent.db"), BACKUP_COUNT).unwrap();
        assert!(result.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
