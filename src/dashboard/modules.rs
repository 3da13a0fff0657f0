use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// One dashboard tab and the files it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub id: String,
    pub title: String,
    /// Object base names, e.g. `ppp_jesi.xlsx`.
    pub files: Vec<String>,
}

impl ModuleSpec {
    pub fn new(id: &str, title: &str, files: &[&str]) -> Self {
        ModuleSpec {
            id: id.to_string(),
            title: title.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Ordered list of modules; order is tab order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub modules: Vec<ModuleSpec>,
}

const DEPARTAMENTOS: &str = "capa_departamentos_2010.geojson";
const CIRCUITOS: &str = "LOCALIDAD CIRCUITO ELECTORAL GEO Y ELECTORES - USAR.txt";

impl ModuleManifest {
    /// The four report modules of the integrated dashboard.
    pub fn builtin() -> Self {
        ModuleManifest {
            modules: vec![
                ModuleSpec::new(
                    "cba_capacita",
                    "CBA Me Capacita",
                    &[
                        "VT_ALUMNOS_EN_CURSOS.parquet",
                        "VT_INSCRIPCIONES_PRG129.parquet",
                        "VT_CURSOS_SEDES_GEO.parquet",
                        DEPARTAMENTOS,
                    ],
                ),
                ModuleSpec::new(
                    "bco_gente",
                    "Banco de la Gente",
                    &[
                        "VT_CUMPLIMIENTO_FORMULARIOS.parquet",
                        "VT_NOMINA_REP_RECUPERO_X_ANIO.parquet",
                        DEPARTAMENTOS,
                        CIRCUITOS,
                    ],
                ),
                ModuleSpec::new(
                    "empleo",
                    "Programas de Empleo",
                    &[
                        "ppp_jesi.xlsx",
                        "mas26_jesi.xlsx",
                        CIRCUITOS,
                        "LOCALIDAD CIRCUITO ELECTORAL GEO Y ELECTORES - DATOS_CENSALES.txt",
                        "VT_REPORTES_PPP_MAS26.parquet",
                        "vt_empresas_adheridas.parquet",
                        "vt_empresas_ARCA.parquet",
                        "VT_PUESTOS_X_FICHAS.parquet",
                        DEPARTAMENTOS,
                        "VT_REPORTE_LIQUIDACION_LOCALIDAD.parquet",
                    ],
                ),
                ModuleSpec::new(
                    "empredimientos",
                    "Empredimientos",
                    &["desarrollo_emprendedor.csv"],
                ),
            ],
        }
    }

    /// Read a manifest from JSON: `{"modules": [{"id", "title", "files"}, ...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let manifest: ModuleManifest = serde_json::from_str(&text)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for module in &self.modules {
            if module.id.trim().is_empty() {
                bail!("manifest contains a module with an empty id");
            }
            if !seen.insert(module.id.as_str()) {
                bail!("module '{}' is declared twice", module.id);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.id.as_str())
    }

    /// Requirement map for a single module, as the batch loader takes it.
    pub fn required_for(&self, id: &str) -> Option<BTreeMap<String, BTreeSet<String>>> {
        let module = self.get(id)?;
        let mut required = BTreeMap::new();
        required.insert(module.id.clone(), module.files.iter().cloned().collect());
        Some(required)
    }

    /// Every module's requirements.
    pub fn required_files(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.modules
            .iter()
            .map(|m| (m.id.clone(), m.files.iter().cloned().collect()))
            .collect()
    }
}

impl Default for ModuleManifest {
    fn default() -> Self {
        Self::builtin()
    }
}
