//! Isolated virtual network.
//!
//! The address block must be a class A `/16`. Subnets are carved out of
//! it group by group, one block per availability segment, each block
//! aligned to its own size. Reserved groups take address space for later
//! growth but produce no resources.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use privx_core::{PlanError, PlanResult, Resource, ResourceRef, Scope, Template, intrinsic};

/// Public subnets route through the internet gateway, private ones
/// through the NAT gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetKind {
    Public,
    Private,
}

impl SubnetKind {
    pub fn name(&self) -> &'static str {
        match self {
            SubnetKind::Public => "Public",
            SubnetKind::Private => "Private",
        }
    }
}

/// One subnet group, repeated in every availability segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetConfig {
    pub kind: SubnetKind,
    pub cidr_mask: u8,
    pub reserved: bool,
}

impl SubnetConfig {
    pub fn public(cidr_mask: u8) -> Self {
        Self { kind: SubnetKind::Public, cidr_mask, reserved: false }
    }

    pub fn private(cidr_mask: u8) -> Self {
        Self { kind: SubnetKind::Private, cidr_mask, reserved: false }
    }

    pub fn reserved(mut self) -> Self {
        self.reserved = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub cidr: String,
    pub max_azs: usize,
    pub nat_gateways: usize,
    pub subnets: Vec<SubnetConfig>,
}

impl NetworkSpec {
    /// Two availability segments, one NAT gateway, and a small public and
    /// private subnet per segment with a reserved /19 behind each.
    pub fn new(cidr: &str) -> Self {
        Self {
            cidr: cidr.to_string(),
            max_azs: 2,
            nat_gateways: 1,
            subnets: vec![
                SubnetConfig::public(24),
                SubnetConfig::public(19).reserved(),
                SubnetConfig::private(24),
                SubnetConfig::private(19).reserved(),
            ],
        }
    }
}

/// A subnet block chosen by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetBlock {
    pub kind: SubnetKind,
    pub az_index: usize,
    pub cidr: String,
    pub reserved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub resource: ResourceRef,
    pub cidr: String,
    pub az_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub resource: ResourceRef,
    pub cidr: String,
    pub public_subnets: Vec<Subnet>,
    pub private_subnets: Vec<Subnet>,
    /// Resources the private subnets need before they can reach out.
    pub egress: Vec<ResourceRef>,
}

impl Vpc {
    pub fn id(&self) -> serde_json::Value {
        self.resource.reference()
    }

    pub fn subnets(&self, kind: SubnetKind) -> &[Subnet] {
        match kind {
            SubnetKind::Public => &self.public_subnets,
            SubnetKind::Private => &self.private_subnets,
        }
    }

    pub fn subnet_ids(&self, kind: SubnetKind) -> Vec<serde_json::Value> {
        self.subnets(kind).iter().map(|s| s.resource.reference()).collect()
    }
}

/// Check the address block and return it with host bits cleared.
pub fn validate_cidr(cidr: &str) -> PlanResult<Ipv4Net> {
    let invalid = || PlanError::InvalidCidr(cidr.to_string());
    let net: Ipv4Net = cidr.parse().map_err(|_| invalid())?;
    if net.prefix_len() != 16 || net.addr().octets()[0] != 10 {
        return Err(invalid());
    }
    Ok(net.trunc())
}

/// Lay out subnet blocks for every group and availability segment.
pub fn allocate_subnets(spec: &NetworkSpec) -> PlanResult<Vec<SubnetBlock>> {
    let network = validate_cidr(&spec.cidr)?;
    // First address not yet handed out; `None` once the block is used up.
    let mut cursor = Some(network.network());
    let mut blocks = Vec::new();

    for group in &spec.subnets {
        let candidates = network
            .subnets(group.cidr_mask)
            .ok()
            .filter(|_| group.cidr_mask <= 28)
            .ok_or_else(|| PlanError::InvalidContext {
                key: "cidr_mask".to_string(),
                value: group.cidr_mask.to_string(),
                reason: "subnet mask must be between /16 and /28".to_string(),
            })?;
        let mut candidates = candidates.peekable();
        for az_index in 0..spec.max_azs {
            let block = cursor.and_then(|start| {
                while candidates.next_if(|net| net.network() < start).is_some() {}
                candidates.next()
            });
            let Some(block) = block else {
                return Err(PlanError::InvalidContext {
                    key: "subnets".to_string(),
                    value: spec.cidr.clone(),
                    reason: "subnet layout does not fit the /16 block".to_string(),
                });
            };
            blocks.push(SubnetBlock {
                kind: group.kind,
                az_index,
                cidr: block.to_string(),
                reserved: group.reserved,
            });
            cursor = u32::from(block.broadcast()).checked_add(1).map(Ipv4Addr::from);
        }
    }
    Ok(blocks)
}

/// Describe the network. The address block is validated before anything
/// is added to the template.
pub fn vpc(template: &mut Template, scope: &Scope, spec: &NetworkSpec) -> PlanResult<Vpc> {
    let blocks = allocate_subnets(spec)?;
    let network = validate_cidr(&spec.cidr)?;
    let scope = scope.child("Vpc");

    let vpc = template.add(
        &scope.logical_id("Resource"),
        Resource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": network.to_string(),
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": [{ "Key": "Name", "Value": scope.path() }],
            }),
        ),
    )?;

    let igw = template.add(&scope.logical_id("IGW"), Resource::new("AWS::EC2::InternetGateway", json!({})))?;
    let attachment = template.add(
        &scope.logical_id("VPCGW"),
        Resource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({ "VpcId": vpc.reference(), "InternetGatewayId": igw.reference() }),
        ),
    )?;

    let mut public_subnets = Vec::new();
    let mut private_subnets = Vec::new();
    let mut nat_gateways: Vec<ResourceRef> = Vec::new();
    let mut egress = Vec::new();

    // Public subnets first, so that NAT gateways exist for private routes.
    let ordered = blocks
        .iter()
        .filter(|b| !b.reserved && b.kind == SubnetKind::Public)
        .chain(blocks.iter().filter(|b| !b.reserved && b.kind == SubnetKind::Private));

    for block in ordered {
        let name = format!("{}Subnet{}", block.kind.name(), block.az_index + 1);
        let subnet_scope = scope.child(&name);
        let subnet = template.add(
            &subnet_scope.logical_id("Subnet"),
            Resource::new(
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": vpc.reference(),
                    "CidrBlock": block.cidr,
                    "AvailabilityZone": intrinsic::select(block.az_index, intrinsic::get_azs()),
                    "MapPublicIpOnLaunch": block.kind == SubnetKind::Public,
                    "Tags": [
                        { "Key": "Name", "Value": subnet_scope.path() },
                        { "Key": "privx:subnet-type", "Value": block.kind.name() },
                    ],
                }),
            ),
        )?;
        let table = template.add(
            &subnet_scope.logical_id("RouteTable"),
            Resource::new("AWS::EC2::RouteTable", json!({ "VpcId": vpc.reference() })),
        )?;
        template.add(
            &subnet_scope.logical_id("RouteTableAssociation"),
            Resource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({ "RouteTableId": table.reference(), "SubnetId": subnet.reference() }),
            ),
        )?;

        let route_id = subnet_scope.logical_id("DefaultRoute");
        match block.kind {
            SubnetKind::Public => {
                let route = template.add(
                    &route_id,
                    Resource::new(
                        "AWS::EC2::Route",
                        json!({
                            "RouteTableId": table.reference(),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "GatewayId": igw.reference(),
                        }),
                    ),
                )?;
                template.add_dependency(route.id(), attachment.id())?;

                if nat_gateways.len() < spec.nat_gateways {
                    let eip = template.add(
                        &subnet_scope.logical_id("EIP"),
                        Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })),
                    )?;
                    let nat = template.add(
                        &subnet_scope.logical_id("NATGateway"),
                        Resource::new(
                            "AWS::EC2::NatGateway",
                            json!({
                                "SubnetId": subnet.reference(),
                                "AllocationId": eip.attr("AllocationId"),
                            }),
                        ),
                    )?;
                    template.add_dependency(nat.id(), route.id())?;
                    nat_gateways.push(nat);
                }
                public_subnets.push(Subnet { resource: subnet, cidr: block.cidr.clone(), az_index: block.az_index });
            }
            SubnetKind::Private => {
                // Spread private subnets over the available NAT gateways.
                let Some(nat) = nat_gateways.get(block.az_index % nat_gateways.len().max(1)) else {
                    return Err(PlanError::InvalidContext {
                        key: "nat_gateways".to_string(),
                        value: spec.nat_gateways.to_string(),
                        reason: "private subnets need at least one NAT gateway".to_string(),
                    });
                };
                let route = template.add(
                    &route_id,
                    Resource::new(
                        "AWS::EC2::Route",
                        json!({
                            "RouteTableId": table.reference(),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "NatGatewayId": nat.reference(),
                        }),
                    ),
                )?;
                egress.push(route);
                private_subnets.push(Subnet { resource: subnet, cidr: block.cidr.clone(), az_index: block.az_index });
            }
        }
        debug!(subnet = %block.cidr, kind = block.kind.name(), az = block.az_index, "subnet described");
    }

    info!(
        vpc = %vpc,
        cidr = %spec.cidr,
        public = public_subnets.len(),
        private = private_subnets.len(),
        "network described"
    );

    Ok(Vpc {
        resource: vpc,
        cidr: network.to_string(),
        public_subnets,
        private_subnets,
        egress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_block_yields_one_network() {
        let mut t = Template::new("test");
        let vpc = vpc(&mut t, &Scope::new("s"), &NetworkSpec::new("10.0.0.0/16")).unwrap();
        assert_eq!(t.count_of_type("AWS::EC2::VPC"), 1);
        assert_eq!(vpc.public_subnets.len(), 2);
        assert_eq!(vpc.private_subnets.len(), 2);
        assert_eq!(t.count_of_type("AWS::EC2::Subnet"), 4);
        assert_eq!(t.count_of_type("AWS::EC2::NatGateway"), 1);
        assert_eq!(t.count_of_type("AWS::EC2::EIP"), 1);
        t.validate().unwrap();
    }

    #[test]
    fn invalid_blocks_describe_nothing() {
        for cidr in ["192.168.0.0/16", "10.0.0.0/24", "172.16.0.0/16", "10.0.0/16", "10.0.0.300/16", ""] {
            let mut t = Template::new("test");
            let err = vpc(&mut t, &Scope::new("s"), &NetworkSpec::new(cidr)).unwrap_err();
            assert!(matches!(err, PlanError::InvalidCidr(_)), "{cidr}: {err}");
            assert!(t.is_empty(), "{cidr} left resources behind");
        }
    }

    #[test]
    fn subnet_layout_skips_reserved_space() {
        let blocks = allocate_subnets(&NetworkSpec::new("10.1.0.0/16")).unwrap();
        let active: Vec<&str> = blocks.iter().filter(|b| !b.reserved).map(|b| b.cidr.as_str()).collect();
        assert_eq!(active, vec!["10.1.0.0/24", "10.1.1.0/24", "10.1.96.0/24", "10.1.97.0/24"]);
        let reserved: Vec<&str> = blocks.iter().filter(|b| b.reserved).map(|b| b.cidr.as_str()).collect();
        assert_eq!(reserved, vec!["10.1.32.0/19", "10.1.64.0/19", "10.1.128.0/19", "10.1.160.0/19"]);
    }

    #[test]
    fn host_bits_are_masked() {
        assert_eq!(validate_cidr("10.4.7.9/16").unwrap().to_string(), "10.4.0.0/16");
    }

    #[test]
    fn oversized_layout_is_rejected() {
        let mut spec = NetworkSpec::new("10.0.0.0/16");
        spec.subnets.push(SubnetConfig::private(17));
        assert!(allocate_subnets(&spec).is_err());
    }

    #[test]
    fn subnet_masks_outside_the_block_are_rejected() {
        for mask in [15, 29] {
            let mut spec = NetworkSpec::new("10.0.0.0/16");
            spec.subnets = vec![SubnetConfig::public(mask)];
            let err = allocate_subnets(&spec).unwrap_err();
            assert!(matches!(err, PlanError::InvalidContext { ref key, .. } if key == "cidr_mask"), "/{mask}: {err}");
        }
    }

    #[test]
    fn layout_may_fill_the_whole_block() {
        let mut spec = NetworkSpec::new("10.0.0.0/16");
        spec.subnets = vec![SubnetConfig::public(17)];
        let blocks = allocate_subnets(&spec).unwrap();
        let cidrs: Vec<&str> = blocks.iter().map(|b| b.cidr.as_str()).collect();
        assert_eq!(cidrs, vec!["10.0.0.0/17", "10.0.128.0/17"]);

        spec.max_azs = 3;
        assert!(allocate_subnets(&spec).is_err());
    }

    #[test]
    fn private_routes_use_nat() {
        let mut t = Template::new("test");
        let vpc = vpc(&mut t, &Scope::new("s"), &NetworkSpec::new("10.0.0.0/16")).unwrap();
        assert_eq!(vpc.egress.len(), 2);
        for route in &vpc.egress {
            assert!(t.get(route.id()).unwrap().property("NatGatewayId").is_some());
        }
    }
}
