// SPDX-License-Identifier: Apache-2.0

//! Undirected relation edges over accessions.
//!
//! An edge is stored exactly once, in canonical form: the endpoint with
//! the smaller `(AccessionType ordinal, accession)` key is the source.
//! `(A, B)` and `(B, A)` therefore denote the same row.

use crate::accession::AccessionType;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationEdge {
    pub src_type: AccessionType,
    pub src_accession: String,
    pub dst_type: AccessionType,
    pub dst_accession: String,
}

impl RelationEdge {
    /// Build an edge in canonical form regardless of argument order.
    #[must_use]
    pub fn new(
        a_type: AccessionType,
        a_accession: impl Into<String>,
        b_type: AccessionType,
        b_accession: impl Into<String>,
    ) -> Self {
        Self {
            src_type: a_type,
            src_accession: a_accession.into(),
            dst_type: b_type,
            dst_accession: b_accession.into(),
        }
        .canonicalize()
    }

    #[must_use]
    pub fn canonicalize(self) -> Self {
        if self.is_canonical() {
            self
        } else {
            Self {
                src_type: self.dst_type,
                src_accession: self.dst_accession,
                dst_type: self.src_type,
                dst_accession: self.src_accession,
            }
        }
    }

    #[must_use]
    pub fn is_canonical(&self) -> bool {
        endpoint_order(
            self.src_type,
            &self.src_accession,
            self.dst_type,
            &self.dst_accession,
        ) != Ordering::Greater
    }

    /// The endpoint opposite to `(ty, accession)`, if this edge touches it.
    #[must_use]
    pub fn other_endpoint(&self, ty: AccessionType, accession: &str) -> Option<(AccessionType, &str)> {
        if self.src_type == ty && self.src_accession == accession {
            Some((self.dst_type, &self.dst_accession))
        } else if self.dst_type == ty && self.dst_accession == accession {
            Some((self.src_type, &self.src_accession))
        } else {
            None
        }
    }
}

fn endpoint_order(
    a_type: AccessionType,
    a_accession: &str,
    b_type: AccessionType,
    b_accession: &str,
) -> Ordering {
    a_type
        .ordinal()
        .cmp(&b_type.ordinal())
        .then_with(|| a_accession.cmp(b_accession))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn construction_canonicalizes() {
        let edge = RelationEdge::new(
            AccessionType::Biosample,
            "SAMN0001",
            AccessionType::Bioproject,
            "PRJNA001",
        );
        assert_eq!(edge.src_type, AccessionType::Bioproject);
        assert_eq!(edge.src_accession, "PRJNA001");
        assert_eq!(edge.dst_type, AccessionType::Biosample);
        assert_eq!(edge.dst_accession, "SAMN0001");
    }

    #[test]
    fn same_type_orders_by_accession() {
        let edge = RelationEdge::new(
            AccessionType::Bioproject,
            "PRJNA9616",
            AccessionType::Bioproject,
            "PRJNA0001",
        );
        assert_eq!(edge.src_accession, "PRJNA0001");
        assert_eq!(edge.dst_accession, "PRJNA9616");
    }

    #[test]
    fn other_endpoint_sees_both_orientations() {
        let edge = RelationEdge::new(
            AccessionType::Bioproject,
            "PRJDB1",
            AccessionType::Biosample,
            "SAMD1",
        );
        assert_eq!(
            edge.other_endpoint(AccessionType::Biosample, "SAMD1"),
            Some((AccessionType::Bioproject, "PRJDB1"))
        );
        assert_eq!(
            edge.other_endpoint(AccessionType::Bioproject, "PRJDB1"),
            Some((AccessionType::Biosample, "SAMD1"))
        );
        assert_eq!(edge.other_endpoint(AccessionType::Geo, "GSE1"), None);
    }

    fn arb_type() -> impl Strategy<Value = AccessionType> {
        prop_oneof![
            Just(AccessionType::Bioproject),
            Just(AccessionType::UmbrellaBioproject),
            Just(AccessionType::Biosample),
            Just(AccessionType::SraRun),
            Just(AccessionType::JgaDataset),
            Just(AccessionType::InsdcMaster),
            Just(AccessionType::Taxonomy),
        ]
    }

    proptest! {
        #[test]
        fn canonicalize_is_idempotent(
            a_ty in arb_type(), a in "[A-Z]{3}[0-9]{1,6}",
            b_ty in arb_type(), b in "[A-Z]{3}[0-9]{1,6}",
        ) {
            let edge = RelationEdge {
                src_type: a_ty,
                src_accession: a,
                dst_type: b_ty,
                dst_accession: b,
            };
            let once = edge.clone().canonicalize();
            let twice = once.clone().canonicalize();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn edge_symmetry(
            a_ty in arb_type(), a in "[A-Z]{3}[0-9]{1,6}",
            b_ty in arb_type(), b in "[A-Z]{3}[0-9]{1,6}",
        ) {
            let forward = RelationEdge::new(a_ty, a.clone(), b_ty, b.clone());
            let backward = RelationEdge::new(b_ty, b, a_ty, a);
            prop_assert_eq!(forward, backward);
        }
    }
}
