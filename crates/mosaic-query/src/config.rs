/// WGS 84, the geographic CRS geometry columns are reprojected to.
pub const DEFAULT_GEOMETRY_SRID: i64 = 4326;

pub const DEFAULT_TABLE_ALIAS: &str = "main";

/// Configuration for [`QueryCompiler`](crate::QueryCompiler)
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerConfig {
    /// SRID geometry selects are transformed to before GeoJSON serialization
    pub geometry_srid: i64,
    /// Alias of the queried table inside the compiled query
    pub table_alias: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self {
            geometry_srid: DEFAULT_GEOMETRY_SRID,
            table_alias: DEFAULT_TABLE_ALIAS.to_string(),
        }
    }

    pub fn with_geometry_srid(mut self, srid: i64) -> Self {
        self.geometry_srid = srid;
        self
    }

    pub fn with_table_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = alias.into();
        self
    }
}
