//! Storage seam: unmatched rows in, association rows out.
//!
//! All writes of a run happen between `begin` and `commit`; dropping a run
//! without committing (or calling `rollback`) leaves the association table
//! untouched.

use postgres::{Client, NoTls};

use crate::error::CarlinkError;

/// One expected unit of content: a slice of a larger file, identified by the
/// binary form of its CID.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRange {
    pub id: i64,
    pub cid: Vec<u8>,
}

/// One CAR file known to the database, addressed relative to the storage
/// directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CarFile {
    pub id: i64,
    pub storage_path: String,
}

pub trait StoreLike {
    /// File ranges with no association yet.
    fn load_unmatched_file_ranges(&mut self) -> Result<Vec<FileRange>, CarlinkError>;
    /// CAR files with no association yet.
    fn load_unmatched_cars(&mut self) -> Result<Vec<CarFile>, CarlinkError>;
    fn begin(&mut self) -> Result<(), CarlinkError>;
    /// Stages one association row inside the open transaction.
    fn insert_association(&mut self, file_range_id: i64, car_id: i64)
    -> Result<(), CarlinkError>;
    fn commit(&mut self) -> Result<(), CarlinkError>;
    fn rollback(&mut self) -> Result<(), CarlinkError>;
}

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn connect(conn_str: &str) -> Result<Self, CarlinkError> {
        let client = Client::connect(conn_str, NoTls)?;
        Ok(Self { client })
    }

    /// Creates the association table and its indexes if they are missing.
    /// The source tables (`file_ranges`, `cars`) are owned by the ingesting
    /// system and never created here.
    pub fn ensure_schema(&mut self) -> Result<(), CarlinkError> {
        self.client.batch_execute(
            "CREATE TABLE IF NOT EXISTS file_range_car (
                file_range_id BIGINT NOT NULL,
                car_id BIGINT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_file_range_car_file_range_id
                ON file_range_car (file_range_id);
            CREATE INDEX IF NOT EXISTS idx_file_range_car_car_id
                ON file_range_car (car_id)",
        )?;
        Ok(())
    }
}

impl StoreLike for PostgresStore {
    fn load_unmatched_file_ranges(&mut self) -> Result<Vec<FileRange>, CarlinkError> {
        let rows = self.client.query(
            "SELECT fr.id::bigint, fr.cid FROM file_ranges fr
             WHERE NOT EXISTS (
                 SELECT 1 FROM file_range_car frc
                 WHERE frc.file_range_id = fr.id
             )",
            &[],
        )?;
        Ok(rows
            .into_iter()
            .map(|row| FileRange {
                id: row.get(0),
                cid: row.get(1),
            })
            .collect())
    }

    fn load_unmatched_cars(&mut self) -> Result<Vec<CarFile>, CarlinkError> {
        let rows = self.client.query(
            "SELECT c.id::bigint, c.storage_path FROM cars c
             WHERE NOT EXISTS (
                 SELECT 1 FROM file_range_car frc
                 WHERE frc.car_id = c.id
             )",
            &[],
        )?;
        Ok(rows
            .into_iter()
            .map(|row| CarFile {
                id: row.get(0),
                storage_path: row.get(1),
            })
            .collect())
    }

    // Transaction control runs as plain statements so the trait stays
    // object-safe; postgres::Transaction borrows the client and cannot cross
    // the trait boundary.
    fn begin(&mut self) -> Result<(), CarlinkError> {
        self.client.batch_execute("BEGIN")?;
        Ok(())
    }

    fn insert_association(
        &mut self,
        file_range_id: i64,
        car_id: i64,
    ) -> Result<(), CarlinkError> {
        self.client.execute(
            "INSERT INTO file_range_car (file_range_id, car_id) VALUES ($1, $2)",
            &[&file_range_id, &car_id],
        )?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), CarlinkError> {
        self.client.batch_execute("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), CarlinkError> {
        self.client.batch_execute("ROLLBACK")?;
        Ok(())
    }
}

/// In-memory store with real staging semantics: inserts become visible in
/// `associations` only on commit.
pub struct InMemoryStore {
    pub file_ranges: Vec<FileRange>,
    pub cars: Vec<CarFile>,
    pub associations: Vec<(i64, i64)>,
    staged: Vec<(i64, i64)>,
    in_transaction: bool,
    pub fail_on_insert: bool,
}

impl InMemoryStore {
    pub fn new(file_ranges: Vec<FileRange>, cars: Vec<CarFile>) -> Self {
        Self {
            file_ranges,
            cars,
            associations: Vec::new(),
            staged: Vec::new(),
            in_transaction: false,
            fail_on_insert: false,
        }
    }
}

impl StoreLike for InMemoryStore {
    fn load_unmatched_file_ranges(&mut self) -> Result<Vec<FileRange>, CarlinkError> {
        Ok(self
            .file_ranges
            .iter()
            .filter(|fr| !self.associations.iter().any(|(rid, _)| *rid == fr.id))
            .cloned()
            .collect())
    }

    fn load_unmatched_cars(&mut self) -> Result<Vec<CarFile>, CarlinkError> {
        Ok(self
            .cars
            .iter()
            .filter(|car| !self.associations.iter().any(|(_, cid)| *cid == car.id))
            .cloned()
            .collect())
    }

    fn begin(&mut self) -> Result<(), CarlinkError> {
        self.in_transaction = true;
        self.staged.clear();
        Ok(())
    }

    fn insert_association(
        &mut self,
        file_range_id: i64,
        car_id: i64,
    ) -> Result<(), CarlinkError> {
        if !self.in_transaction {
            return Err(CarlinkError::Database("no open transaction".to_string()));
        }
        if self.fail_on_insert {
            return Err(CarlinkError::Database("simulated insert failure".to_string()));
        }
        self.staged.push((file_range_id, car_id));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), CarlinkError> {
        if !self.in_transaction {
            return Err(CarlinkError::Database("no open transaction".to_string()));
        }
        self.associations.append(&mut self.staged);
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), CarlinkError> {
        self.staged.clear();
        self.in_transaction = false;
        Ok(())
    }
}
