//! Bug task targets and their generalization.
//!
//! Upstream rows carry the target as a set of nullable columns. [`Target`]
//! is the parsed form: it can only hold combinations the owning bug task
//! is allowed to have, so everything downstream of [`Target::from_columns`]
//! works with valid targets only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nullable target columns exactly as stored on a bug task or summary row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetColumns {
    #[serde(default)]
    pub product: Option<i64>,
    #[serde(default)]
    pub productseries: Option<i64>,
    #[serde(default)]
    pub distribution: Option<i64>,
    #[serde(default)]
    pub distroseries: Option<i64>,
    #[serde(default)]
    pub sourcepackagename: Option<i64>,
    #[serde(default)]
    pub ociproject: Option<i64>,
}

/// The context a pillar-level target is specialized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    SourcePackage(i64),
    OciProject(i64),
}

/// A validated bug task target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Product {
        product: i64,
        ociproject: Option<i64>,
    },
    ProductSeries {
        productseries: i64,
    },
    Distribution {
        distribution: i64,
        specialization: Option<Specialization>,
    },
    DistroSeries {
        distroseries: i64,
        specialization: Option<Specialization>,
    },
}

/// Why a set of target columns does not describe a valid target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("expected exactly one of product/productseries/distribution/distroseries, found {found}")]
    PillarCount { found: usize },

    #[error("sourcepackagename {sourcepackagename} requires a distribution or distroseries")]
    PackageWithoutDistro { sourcepackagename: i64 },

    #[error("ociproject {ociproject} cannot be combined with {context}")]
    OciProjectConflict {
        ociproject: i64,
        context: &'static str,
    },
}

impl Target {
    /// Parse raw target columns, enforcing the bug task mutual-exclusion rules.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError`] if the columns name zero or several pillars,
    /// or carry a specialization the pillar cannot have.
    pub fn from_columns(columns: &TargetColumns) -> Result<Self, TargetError> {
        let found = [
            columns.product,
            columns.productseries,
            columns.distribution,
            columns.distroseries,
        ]
        .iter()
        .filter(|column| column.is_some())
        .count();
        if found != 1 {
            return Err(TargetError::PillarCount { found });
        }

        let specialization = match (columns.sourcepackagename, columns.ociproject) {
            (Some(_), Some(ociproject)) => {
                return Err(TargetError::OciProjectConflict {
                    ociproject,
                    context: "a sourcepackagename",
                });
            }
            (Some(spn), None) => Some(Specialization::SourcePackage(spn)),
            (None, Some(oci)) => Some(Specialization::OciProject(oci)),
            (None, None) => None,
        };

        if let Some(product) = columns.product {
            return match specialization {
                Some(Specialization::SourcePackage(sourcepackagename)) => {
                    Err(TargetError::PackageWithoutDistro { sourcepackagename })
                }
                Some(Specialization::OciProject(oci)) => Ok(Self::Product {
                    product,
                    ociproject: Some(oci),
                }),
                None => Ok(Self::Product {
                    product,
                    ociproject: None,
                }),
            };
        }

        if let Some(productseries) = columns.productseries {
            return match specialization {
                Some(Specialization::SourcePackage(sourcepackagename)) => {
                    Err(TargetError::PackageWithoutDistro { sourcepackagename })
                }
                Some(Specialization::OciProject(ociproject)) => {
                    Err(TargetError::OciProjectConflict {
                        ociproject,
                        context: "a productseries",
                    })
                }
                None => Ok(Self::ProductSeries { productseries }),
            };
        }

        if let Some(distribution) = columns.distribution {
            return Ok(Self::Distribution {
                distribution,
                specialization,
            });
        }

        match columns.distroseries {
            Some(distroseries) => Ok(Self::DistroSeries {
                distroseries,
                specialization,
            }),
            None => Err(TargetError::PillarCount { found: 0 }),
        }
    }

    /// Flatten back into nullable columns for storage.
    #[must_use]
    pub const fn columns(&self) -> TargetColumns {
        let mut columns = TargetColumns {
            product: None,
            productseries: None,
            distribution: None,
            distroseries: None,
            sourcepackagename: None,
            ociproject: None,
        };
        let specialization = match *self {
            Self::Product {
                product,
                ociproject,
            } => {
                columns.product = Some(product);
                columns.ociproject = ociproject;
                None
            }
            Self::ProductSeries { productseries } => {
                columns.productseries = Some(productseries);
                None
            }
            Self::Distribution {
                distribution,
                specialization,
            } => {
                columns.distribution = Some(distribution);
                specialization
            }
            Self::DistroSeries {
                distroseries,
                specialization,
            } => {
                columns.distroseries = Some(distroseries);
                specialization
            }
        };
        match specialization {
            Some(Specialization::SourcePackage(spn)) => columns.sourcepackagename = Some(spn),
            Some(Specialization::OciProject(oci)) => columns.ociproject = Some(oci),
            None => {}
        }
        columns
    }

    /// The same pillar with its package / OCI project dropped, if it had one.
    ///
    /// Counting every specialized task against its bare pillar as well lets
    /// "all packages of this distroseries" be read without a second query.
    #[must_use]
    pub const fn generalize(&self) -> Option<Self> {
        match *self {
            Self::Product {
                product,
                ociproject: Some(_),
            } => Some(Self::Product {
                product,
                ociproject: None,
            }),
            Self::Distribution {
                distribution,
                specialization: Some(_),
            } => Some(Self::Distribution {
                distribution,
                specialization: None,
            }),
            Self::DistroSeries {
                distroseries,
                specialization: Some(_),
            } => Some(Self::DistroSeries {
                distroseries,
                specialization: None,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = self.columns();
        let (pillar, id) = match *self {
            Self::Product { product, .. } => ("product", product),
            Self::ProductSeries { productseries } => ("productseries", productseries),
            Self::Distribution { distribution, .. } => ("distribution", distribution),
            Self::DistroSeries { distroseries, .. } => ("distroseries", distroseries),
        };
        write!(f, "{pillar}:{id}")?;
        if let Some(spn) = columns.sourcepackagename {
            write!(f, "/sourcepackagename:{spn}")?;
        }
        if let Some(oci) = columns.ociproject {
            write!(f, "/ociproject:{oci}")?;
        }
        Ok(())
    }
}
