//! On-disk layout, rooted at `data_dir`.

use std::path::{Path, PathBuf};

pub struct Layout {
    pub data_dir: PathBuf,
    pub laser_hdfs_data_dir: PathBuf,
    pub group: String,
    pub node: u32,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>, hdfs_data_dir: impl Into<PathBuf>, group: &str, node: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            laser_hdfs_data_dir: hdfs_data_dir.into(),
            group: group.to_string(),
            node,
        }
    }

    fn node_dir(&self, db: &str, table: &str, partition: u32) -> PathBuf {
        self.data_dir
            .join("data")
            .join(&self.group)
            .join(self.node.to_string())
            .join(db)
            .join(table)
            .join(partition.to_string())
    }

    /// `data/<group>/<node>/<db>/<table>/<partition>/<version>/data`.
    pub fn database_data_dir(&self, db: &str, table: &str, partition: u32, version: &str) -> PathBuf {
        self.node_dir(db, table, partition).join(version).join("data")
    }

    pub fn database_data_replicating_dir(
        &self,
        db: &str,
        table: &str,
        partition: u32,
        version: &str,
    ) -> PathBuf {
        self.node_dir(db, table, partition)
            .join(format!("{version}_replicating"))
            .join("data")
    }

    pub fn database_data_deleting_dir(
        &self,
        db: &str,
        table: &str,
        partition: u32,
        version: &str,
    ) -> PathBuf {
        self.node_dir(db, table, partition).join(format!("{version}_deleting"))
    }

    /// `source_data/base/<db>/<table>/<partition>/<version>`, on the HDFS
    /// root (the offline batch pipeline's publish location).
    pub fn source_base_file_path(&self, db: &str, table: &str, partition: u32, version: &str) -> PathBuf {
        self.laser_hdfs_data_dir
            .join("source_data")
            .join("base")
            .join(db)
            .join(table)
            .join(partition.to_string())
            .join(version)
    }

    /// `source_data/delta/<db>/<table>/<base_version>/<partition>/<version>`.
    pub fn source_delta_file_path(
        &self,
        db: &str,
        table: &str,
        base_version: &str,
        partition: u32,
        version: &str,
    ) -> PathBuf {
        self.laser_hdfs_data_dir
            .join("source_data")
            .join("delta")
            .join(db)
            .join(table)
            .join(base_version)
            .join(partition.to_string())
            .join(version)
    }

    /// `temp/delta/<db>/<table>/<partition>/<base_version>/<version>`,
    /// scratch space cleared after every ingest attempt.
    pub fn temp_db_path(
        &self,
        db: &str,
        table: &str,
        partition: u32,
        base_version: &str,
        version: &str,
    ) -> PathBuf {
        self.data_dir
            .join("temp")
            .join("delta")
            .join(db)
            .join(table)
            .join(partition.to_string())
            .join(base_version)
            .join(version)
    }

    pub fn meta_info_dir(&self) -> PathBuf {
        self.data_dir.join("meta_info")
    }
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}
